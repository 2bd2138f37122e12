//! Enum-valued attributes
//!
//! An enum attribute is stored as an integer and exposed as a closed set of
//! named values. The mapping is explicit on both sides: [`AttributeEnum`] for the
//! typed Rust value and [`EnumDef`] for the registry, which the relation builder
//! consults to translate names used in filters.

use std::fmt::Debug;

/// A typed closed set backed by an integer column
pub trait AttributeEnum: Copy + Debug + PartialEq + Send + Sync + 'static {
    /// Column holding the stored integer
    const COLUMN: &'static str;

    /// Every value in declaration order
    fn variants() -> &'static [Self];

    /// Name used in filters and logs
    fn name(&self) -> &'static str;

    /// Stored integer
    fn value(&self) -> i64;

    fn from_value(value: i64) -> Option<Self> {
        Self::variants().iter().copied().find(|v| v.value() == value)
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::variants().iter().copied().find(|v| v.name() == name)
    }
}

/// Registry-side description of an enum attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub column: String,
    pub values: Vec<(String, i64)>,
}

impl EnumDef {
    /// Build the mapping table from a typed enum
    pub fn of<E: AttributeEnum>() -> Self {
        Self {
            column: E::COLUMN.to_string(),
            values: E::variants()
                .iter()
                .map(|v| (v.name().to_string(), v.value()))
                .collect(),
        }
    }

    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.values
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, value)| *value)
    }

    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, candidate)| *candidate == value)
            .map(|(name, _)| name.as_str())
    }

    pub fn contains_value(&self, value: i64) -> bool {
        self.name_of(value).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Shade {
        Light,
        Dark,
    }

    impl AttributeEnum for Shade {
        const COLUMN: &'static str = "shade";

        fn variants() -> &'static [Self] {
            &[Shade::Light, Shade::Dark]
        }

        fn name(&self) -> &'static str {
            match self {
                Shade::Light => "light",
                Shade::Dark => "dark",
            }
        }

        fn value(&self) -> i64 {
            match self {
                Shade::Light => 0,
                Shade::Dark => 1,
            }
        }
    }

    #[test]
    fn test_mapping_both_directions() {
        assert_eq!(Shade::from_value(1), Some(Shade::Dark));
        assert_eq!(Shade::from_name("light"), Some(Shade::Light));
        assert_eq!(Shade::from_value(7), None);

        let def = EnumDef::of::<Shade>();
        assert_eq!(def.column, "shade");
        assert_eq!(def.value_of("dark"), Some(1));
        assert_eq!(def.name_of(0), Some("light"));
        assert!(!def.contains_value(2));
    }
}
