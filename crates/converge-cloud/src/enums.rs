//! Closed enumerations with case-insensitive lookup
//!
//! Platform enums (work request status, lifecycle actions, upgrade sources,
//! ...) are plain Rust enums declared through [`closed_enum!`]. Every one of
//! them parses through the single [`parse_enum`] function, which matches the
//! wire value ignoring ASCII case.

use thiserror::Error;

/// An enumeration whose full set of wire values is known at compile time.
pub trait ClosedEnum: Sized + Copy + 'static {
    /// Type name used in error messages
    const NAME: &'static str;

    /// Every variant, in declaration order
    const VARIANTS: &'static [Self];

    /// Canonical wire value (e.g. `"IN_PROGRESS"`)
    fn as_str(&self) -> &'static str;
}

/// Returned when a string does not name any variant of a closed enum.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported enum value for {type_name}: {value}. Supported values are: {}", .allowed.join(","))]
pub struct UnknownVariant {
    pub type_name: &'static str,
    pub value: String,
    pub allowed: Vec<&'static str>,
}

/// Parse a wire value into `T`, ignoring ASCII case and surrounding whitespace.
pub fn parse_enum<T: ClosedEnum>(value: &str) -> Result<T, UnknownVariant> {
    let needle = value.trim();
    T::VARIANTS
        .iter()
        .copied()
        .find(|variant| variant.as_str().eq_ignore_ascii_case(needle))
        .ok_or_else(|| UnknownVariant {
            type_name: T::NAME,
            value: value.to_string(),
            allowed: allowed_values::<T>(),
        })
}

/// Canonical wire values of `T`, in declaration order.
pub fn allowed_values<T: ClosedEnum>() -> Vec<&'static str> {
    T::VARIANTS.iter().map(ClosedEnum::as_str).collect()
}

/// Declare a closed enumeration.
///
/// ```ignore
/// closed_enum! {
///     /// Source of a database upgrade
///     pub enum UpgradeSource {
///         DbVersion => "DB_VERSION",
///         DbSoftwareImage => "DB_SOFTWARE_IMAGE",
///     }
/// }
/// ```
///
/// The generated type derives the usual value traits plus serde (using the
/// wire values), implements [`ClosedEnum`], `Display` and `FromStr`.
#[macro_export]
macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $( $(#[$vmeta])* #[serde(rename = $wire)] $variant ),+
        }

        impl $crate::enums::ClosedEnum for $name {
            const NAME: &'static str = stringify!($name);
            const VARIANTS: &'static [Self] = &[ $( $name::$variant ),+ ];

            fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $wire ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($crate::enums::ClosedEnum::as_str(self))
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::enums::UnknownVariant;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                $crate::enums::parse_enum(s)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    closed_enum! {
        enum Scope {
            Global => "GLOBAL",
            Private => "PRIVATE",
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(parse_enum::<Scope>("GLOBAL").unwrap(), Scope::Global);
        assert_eq!(parse_enum::<Scope>("private").unwrap(), Scope::Private);
        assert_eq!(" Private ".parse::<Scope>().unwrap(), Scope::Private);
    }

    #[test]
    fn test_unknown_value_lists_allowed() {
        let err = parse_enum::<Scope>("PUBLIC").unwrap_err();
        assert_eq!(err.type_name, "Scope");
        assert_eq!(err.allowed, vec!["GLOBAL", "PRIVATE"]);
        assert_eq!(
            err.to_string(),
            "unsupported enum value for Scope: PUBLIC. Supported values are: GLOBAL,PRIVATE"
        );
    }

    #[test]
    fn test_display_and_serde_use_wire_value() {
        assert_eq!(Scope::Global.to_string(), "GLOBAL");
        assert_eq!(
            serde_json::to_string(&Scope::Private).unwrap(),
            "\"PRIVATE\""
        );
        let parsed: Scope = serde_json::from_str("\"GLOBAL\"").unwrap();
        assert_eq!(parsed, Scope::Global);
    }
}
