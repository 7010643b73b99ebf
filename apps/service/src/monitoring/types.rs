use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Field written by the socket reachability check.
pub const SOCKET_TEST: &str = "SOCKET_TEST";
/// Field written by the URL-connection reachability check.
pub const HTTP_TEST: &str = "HTTP_TEST";

/// Classification of a single reachability check
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeResult {
    Pass,
    Slow,
    Fail,
}

impl ProbeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeResult::Pass => "PASS",
            ProbeResult::Slow => "SLOW",
            ProbeResult::Fail => "FAIL",
        }
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeResult {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(ProbeResult::Pass),
            "SLOW" => Ok(ProbeResult::Slow),
            "FAIL" => Ok(ProbeResult::Fail),
            other => Err(anyhow::anyhow!("Unknown probe result: {}", other)),
        }
    }
}

/// Results of both reachability checks from one probe run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub socket: ProbeResult,
    pub http: ProbeResult,
}

impl ProbeOutcome {
    pub fn new(socket: ProbeResult, http: ProbeResult) -> Self {
        Self { socket, http }
    }

    /// Worst of the two sub-results: FAIL dominates SLOW, SLOW dominates PASS.
    pub fn connectivity_class(&self) -> ProbeResult {
        self.socket.max(self.http)
    }

    /// Recover the outcome from a persisted sample, if it was probed.
    pub fn from_sample(sample: &Sample) -> Option<Self> {
        let socket = sample.get(SOCKET_TEST)?.parse().ok()?;
        let http = sample.get(HTTP_TEST)?.parse().ok()?;
        Some(Self { socket, http })
    }

    pub fn into_fields(self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(SOCKET_TEST, self.socket.as_str());
        fields.insert(HTTP_TEST, self.http.as_str());
        fields
    }
}

/// Insertion-ordered field-name to value mapping.
///
/// Re-inserting a name replaces its value in place, so the first source to
/// report a field decides where it sits in the sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(Vec<(String, String)>);

impl Fields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn extend(&mut self, other: Fields) {
        for (name, value) in other.0 {
            self.insert(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(existing, _)| existing == name).map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (name, value) in iter {
            fields.insert(name, value);
        }
        fields
    }
}

/// One network-state sample, built once per tick and immutable afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the Unix epoch, strictly increasing per process
    timestamp_millis: i64,

    /// Collected fields in the order the sources reported them
    fields: Fields,
}

impl Sample {
    pub fn new(timestamp_millis: i64, fields: Fields) -> Self {
        Self { timestamp_millis, fields }
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_class_is_worst_result() {
        use ProbeResult::*;
        assert_eq!(ProbeOutcome::new(Pass, Pass).connectivity_class(), Pass);
        assert_eq!(ProbeOutcome::new(Pass, Slow).connectivity_class(), Slow);
        assert_eq!(ProbeOutcome::new(Slow, Fail).connectivity_class(), Fail);
        assert_eq!(ProbeOutcome::new(Fail, Pass).connectivity_class(), Fail);
    }

    #[test]
    fn test_fields_keep_first_insertion_order() {
        let mut fields = Fields::new();
        fields.insert("B", "1");
        fields.insert("A", "2");
        fields.insert("B", "3");

        let collected: Vec<_> = fields.iter().collect();
        assert_eq!(collected, vec![("B", "3"), ("A", "2")]);
    }

    #[test]
    fn test_outcome_from_sample() {
        let mut fields = Fields::new();
        fields.insert("NETWORK_TYPE", "WIFI");
        fields.extend(ProbeOutcome::new(ProbeResult::Fail, ProbeResult::Pass).into_fields());
        let sample = Sample::new(1, fields);

        let outcome = ProbeOutcome::from_sample(&sample).unwrap();
        assert_eq!(outcome.socket, ProbeResult::Fail);
        assert_eq!(outcome.http, ProbeResult::Pass);

        assert!(ProbeOutcome::from_sample(&Sample::new(2, Fields::new())).is_none());
    }

    #[test]
    fn test_fields_serialize_as_ordered_pairs() {
        let fields: Fields = [("Z", "1"), ("A", "2")].into_iter().collect();
        let json = serde_json::to_string(&fields).unwrap();
        assert_eq!(json, r#"[["Z","1"],["A","2"]]"#);
        let back: Fields = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fields);
    }
}
