use std::collections::BTreeMap;

/// Snapshot of the process environment, taken once when a job is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .map(|(key, value)| {
                (
                    key.to_string_lossy().into_owned(),
                    value.to_string_lossy().into_owned(),
                )
            })
            .collect();
        Self { vars }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iter_is_sorted() {
        let env = Environment::from_pairs([("ZED", "1"), ("ALPHA", "2"), ("MID", "3")]);
        let keys: Vec<_> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["ALPHA", "MID", "ZED"]);
        assert_eq!(env.get("MID"), Some("3"));
        assert_eq!(env.get("NOPE"), None);
    }

    #[test]
    fn test_capture_sees_process_environment() {
        let env = Environment::capture();
        assert_eq!(env.is_empty(), std::env::vars_os().next().is_none());
    }
}
