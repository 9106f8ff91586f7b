use aliri_braid::braid;
use std::fmt;

/// Implements redacting `Debug` and `Display` for a secret-bearing borrowed braid
///
/// The plain forms print only a placeholder. The alternate forms print a
/// prefix of the secret, whose length can be controlled with the formatter
/// width and otherwise defaults to `$visible` characters.
macro_rules! redacted {
    ($ty:ty: $label:literal, $visible:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    write!(f, "\"{}\"", Prefix::of(self.as_str(), f.width().unwrap_or($visible)))
                } else {
                    f.write_str(concat!("***", $label, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    write!(f, "{}", Prefix::of(self.as_str(), f.width().unwrap_or(usize::MAX)))
                } else {
                    f.write_str(concat!("***", $label, "***"))
                }
            }
        }
    };
}

/// The first characters of a secret, with an ellipsis if anything was cut
struct Prefix<'a> {
    shown: &'a str,
    truncated: bool,
}

impl<'a> Prefix<'a> {
    fn of(secret: &'a str, max_chars: usize) -> Self {
        if max_chars == 0 {
            return Self {
                shown: "",
                truncated: !secret.is_empty(),
            };
        }

        // One character of the budget is spent on the ellipsis when cutting.
        match secret.char_indices().nth(max_chars - 1) {
            Some((cut, _)) if secret.chars().count() > max_chars => Self {
                shown: &secret[..cut],
                truncated: true,
            },
            _ => Self {
                shown: secret,
                truncated: false,
            },
        }
    }
}

impl fmt::Display for Prefix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.shown)?;
        if self.truncated {
            f.write_str("…")?;
        }
        Ok(())
    }
}

/// A client ID, sent alongside refresh requests to authorities that require one
#[braid(serde)]
pub struct ClientId;

/// A short-lived access token, attached to every outgoing request
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef: "ACCESS TOKEN", 12);

/// A longer-lived refresh token, used only to mint new access tokens
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

redacted!(RefreshTokenRef: "REFRESH TOKEN", 5);
