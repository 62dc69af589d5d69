use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Wraps buyer contact details (phone numbers, recipient names) so they never
/// leak through `{:?}` in tracing output. Serialization keeps the real value,
/// since the store and the buyer's own API responses need it.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> Masked<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl Masked<String> {
    /// Last four characters, for support staff matching a delivery call.
    pub fn tail(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let start = chars.len().saturating_sub(4);
        format!("***{}", chars[start..].iter().collect::<String>())
    }
}

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Masked(********)")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_value_but_json_keeps_it() {
        let phone = Masked::new("+254700123456".to_string());

        assert_eq!(format!("{:?}", phone), "Masked(********)");
        assert_eq!(serde_json::to_string(&phone).unwrap(), "\"+254700123456\"");
        assert_eq!(phone.tail(), "***3456");
    }

    #[test]
    fn test_short_value_tail() {
        assert_eq!(Masked::new("12".to_string()).tail(), "***12");
    }
}
