//! Integer codes carried by the enumerations of the wire records.

use serde::{Deserialize, Deserializer};

/// Any integer found where an enumeration code is expected.
///
/// Values outside `u8` are kept as "not a code" so each enumeration can
/// map them onto its own fallback instead of rejecting the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WireCode(Option<u8>);

impl WireCode {
    /// Returns the code when it fits the wire's byte range.
    pub(crate) const fn narrow(self) -> Option<u8> {
        self.0
    }
}

impl<'de> Deserialize<'de> for WireCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i128::deserialize(deserializer)?;
        Ok(Self(u8::try_from(value).ok()))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("0", Some(0))]
    #[case("255", Some(255))]
    #[case("256", None)]
    #[case("-1", None)]
    #[case("18446744073709551615", None)]
    fn codes_outside_a_byte_are_not_codes(#[case] json: &str, #[case] expected: Option<u8>) {
        let code: WireCode = serde_json::from_str(json).expect("decode integer");
        assert_eq!(code.narrow(), expected);
    }

    #[test]
    fn non_integers_are_rejected() {
        assert!(serde_json::from_str::<WireCode>(r#""3""#).is_err());
    }
}
