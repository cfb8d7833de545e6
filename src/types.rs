use serde::{Deserialize, Serialize};
use shrinkwraprs::Shrinkwrap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} name {name:?}: {reason}")]
pub struct InvalidName {
    pub kind: &'static str,
    pub name: String,
    pub reason: &'static str,
}

macro_rules! impl_validated_name {
    (pub struct $outer:ident, $kind:literal, $validate:path) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            Shrinkwrap,
        )]
        #[serde(try_from = "String", into = "String")]
        pub struct $outer(String);

        impl $outer {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $outer {
            type Error = InvalidName;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                match $validate(&value) {
                    Ok(()) => Ok(Self(value)),
                    Err(reason) => Err(InvalidName {
                        kind: $kind,
                        name: value,
                        reason,
                    }),
                }
            }
        }

        impl From<$outer> for String {
            fn from(value: $outer) -> Self {
                value.0
            }
        }

        impl std::str::FromStr for $outer {
            type Err = InvalidName;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::try_from(s.to_string())
            }
        }

        impl std::fmt::Display for $outer {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

// Network names never contain '_', which keeps "{network}_{contract}" unambiguous
fn validate_network(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("must not be empty");
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err("only ASCII letters, digits and '-' are allowed");
    }

    Ok(())
}

fn validate_contract(name: &str) -> Result<(), &'static str> {
    let Some(first) = name.chars().next() else {
        return Err("must not be empty");
    };

    if first.is_ascii_digit() {
        return Err("must not start with a digit");
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return Err("only ASCII letters, digits, '_' and '$' are allowed");
    }

    Ok(())
}

impl_validated_name!(pub struct NetworkName, "network", validate_network);
impl_validated_name!(pub struct ContractName, "contract", validate_contract);
