use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ConfigError;
use crate::metadata::{format_timestamp, DatePartition, Metadata};

/// Sentinel used for a missing or malformed year/month/day segment
pub const UNKNOWN_PARTITION: &str = "unknown";

/// How the part of a key after the inbound prefix is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScheme {
    /// `clientId/.../fileName`
    Simple,
    /// `clientId/year/month/day/fileName`
    DatePartitioned,
}

impl FromStr for KeyScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(KeyScheme::Simple),
            "date_partitioned" | "date-partitioned" => Ok(KeyScheme::DatePartitioned),
            other => Err(ConfigError::UnknownKeyScheme(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpretation {
    Parsed(Metadata),
    /// Outside the monitored prefix, not ours to handle
    Skip,
    /// Inside the prefix but no usable record can be derived
    Malformed(String),
}

/// Turns object keys into ledger records. Pure: the processing time is
/// passed in by the caller.
#[derive(Debug, Clone)]
pub struct KeyInterpreter {
    inbound_prefix: String,
    scheme: KeyScheme,
    unknown_client_id: String,
}

impl KeyInterpreter {
    pub fn new(inbound_prefix: &str, scheme: KeyScheme, unknown_client_id: &str) -> Self {
        let mut inbound_prefix = inbound_prefix.trim().trim_start_matches('/').to_string();
        if !inbound_prefix.is_empty() && !inbound_prefix.ends_with('/') {
            inbound_prefix.push('/');
        }
        Self {
            inbound_prefix,
            scheme,
            unknown_client_id: unknown_client_id.to_string(),
        }
    }

    pub fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    pub fn inbound_prefix(&self) -> &str {
        &self.inbound_prefix
    }

    pub fn interpret(&self, raw_key: &str, now: DateTime<Utc>) -> Interpretation {
        let key = match decode_key(raw_key) {
            Ok(key) => key,
            Err(reason) => return Interpretation::Malformed(reason),
        };

        let Some(remainder) = key.strip_prefix(self.inbound_prefix.as_str()) else {
            return Interpretation::Skip;
        };

        let segments: Vec<&str> = remainder.split('/').collect();
        let file_name = segments.last().copied().unwrap_or_default();
        if file_name.is_empty() {
            return Interpretation::Malformed(format!("key '{key}' has no file name"));
        }

        let client_id = match segments.as_slice() {
            [client, _, ..] if !client.is_empty() => client.to_string(),
            _ => self.unknown_client_id.clone(),
        };

        let partition = match self.scheme {
            KeyScheme::Simple => None,
            KeyScheme::DatePartitioned => Some(date_partition(&segments)),
        };

        Interpretation::Parsed(Metadata {
            file_name: file_name.to_string(),
            client_id,
            upload_timestamp: format_timestamp(now),
            partition,
        })
    }
}

/// Notification payloads carry form-encoded keys: `+` is a space and
/// everything else is percent-escaped.
pub fn decode_key(raw_key: &str) -> Result<String, String> {
    let spaced = raw_key.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| format!("key '{raw_key}' is not valid UTF-8 once decoded: {e}"))
}

// Positions 1..=3 are year/month/day, but only when they precede the file name.
fn date_partition(segments: &[&str]) -> DatePartition {
    let directories = &segments[..segments.len().saturating_sub(1)];
    let segment = |index: usize, valid: fn(&str) -> bool| {
        directories
            .get(index)
            .filter(|value| valid(value))
            .map(|value| value.to_string())
            .unwrap_or_else(|| UNKNOWN_PARTITION.to_string())
    };

    DatePartition {
        year: segment(1, is_year),
        month: segment(2, |m| is_two_digit_in(m, 1, 12)),
        day: segment(3, |d| is_two_digit_in(d, 1, 31)),
    }
}

fn is_year(value: &str) -> bool {
    value.len() == 4 && value.bytes().all(|b| b.is_ascii_digit())
}

fn is_two_digit_in(value: &str, min: u32, max: u32) -> bool {
    value.len() == 2
        && value.bytes().all(|b| b.is_ascii_digit())
        && value
            .parse::<u32>()
            .map(|n| (min..=max).contains(&n))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
    }

    fn simple() -> KeyInterpreter {
        KeyInterpreter::new("audiofiles/", KeyScheme::Simple, "UnknownClient")
    }

    fn dated() -> KeyInterpreter {
        KeyInterpreter::new("inbound/", KeyScheme::DatePartitioned, "UnknownClient")
    }

    fn parsed(result: Interpretation) -> Metadata {
        match result {
            Interpretation::Parsed(metadata) => metadata,
            other => panic!("expected a parsed record, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_scheme_reads_client_and_file() {
        let metadata = parsed(simple().interpret("audiofiles/client1/song.mp3", now()));

        assert_eq!(metadata.file_name, "song.mp3");
        assert_eq!(metadata.client_id, "client1");
        assert_eq!(metadata.upload_timestamp, "2024-05-01T12:30:00.000Z");
        assert_eq!(metadata.partition, None);
    }

    #[test]
    fn test_simple_scheme_nested_directories_keep_first_segment_as_client() {
        let metadata = parsed(simple().interpret("audiofiles/client1/albums/a/song.mp3", now()));
        assert_eq!(metadata.client_id, "client1");
        assert_eq!(metadata.file_name, "song.mp3");
    }

    #[test]
    fn test_missing_client_segment_falls_back_to_sentinel() {
        let metadata = parsed(simple().interpret("audiofiles/song.mp3", now()));
        assert_eq!(metadata.client_id, "UnknownClient");
        assert_eq!(metadata.file_name, "song.mp3");

        let metadata = parsed(simple().interpret("audiofiles//song.mp3", now()));
        assert_eq!(metadata.client_id, "UnknownClient");
    }

    #[test]
    fn test_key_outside_prefix_is_skipped() {
        assert_eq!(simple().interpret("metadata/metadata.csv", now()), Interpretation::Skip);
        assert_eq!(simple().interpret("audiofilesX/c/a.mp3", now()), Interpretation::Skip);
        assert_eq!(dated().interpret("other/clientA/2024/05/01/a.mp3", now()), Interpretation::Skip);
    }

    #[test]
    fn test_prefix_without_trailing_slash_is_normalized() {
        let interpreter = KeyInterpreter::new("audiofiles", KeyScheme::Simple, "UnknownClient");
        assert_eq!(interpreter.inbound_prefix(), "audiofiles/");
        assert_eq!(interpreter.interpret("audiofilesX/a.mp3", now()), Interpretation::Skip);
        assert!(matches!(
            interpreter.interpret("audiofiles/c/a.mp3", now()),
            Interpretation::Parsed(_)
        ));
    }

    #[test]
    fn test_folder_placeholder_is_malformed_not_parsed() {
        assert!(matches!(
            simple().interpret("audiofiles/client1/", now()),
            Interpretation::Malformed(_)
        ));
        assert!(matches!(
            simple().interpret("audiofiles/", now()),
            Interpretation::Malformed(_)
        ));
    }

    #[test]
    fn test_encoded_keys_are_decoded() {
        let metadata = parsed(simple().interpret("audiofiles/client+one/my+song%281%29.mp3", now()));
        assert_eq!(metadata.client_id, "client one");
        assert_eq!(metadata.file_name, "my song(1).mp3");

        // an encoded plus stays a plus
        let metadata = parsed(simple().interpret("audiofiles/c/a%2Bb.mp3", now()));
        assert_eq!(metadata.file_name, "a+b.mp3");
    }

    #[test]
    fn test_encoded_prefix_still_matches() {
        let interpreter = KeyInterpreter::new("audio files/", KeyScheme::Simple, "UnknownClient");
        let metadata = parsed(interpreter.interpret("audio+files/c/a.mp3", now()));
        assert_eq!(metadata.client_id, "c");
    }

    #[test]
    fn test_invalid_utf8_escape_is_malformed() {
        assert!(matches!(
            simple().interpret("audiofiles/c/%FF%FE.mp3", now()),
            Interpretation::Malformed(_)
        ));
    }

    #[test]
    fn test_date_partitioned_scheme() {
        let metadata = parsed(dated().interpret("inbound/clientA/2024/05/01/track1.mp3", now()));

        assert_eq!(metadata.file_name, "track1.mp3");
        assert_eq!(metadata.client_id, "clientA");
        assert_eq!(
            metadata.partition,
            Some(DatePartition {
                year: "2024".to_string(),
                month: "05".to_string(),
                day: "01".to_string(),
            })
        );
    }

    #[test]
    fn test_date_partitioned_malformed_segments_degrade() {
        let metadata = parsed(dated().interpret("inbound/clientA/24/13/01/track1.mp3", now()));
        let partition = metadata.partition.unwrap();
        assert_eq!(partition.year, UNKNOWN_PARTITION);
        assert_eq!(partition.month, UNKNOWN_PARTITION);
        assert_eq!(partition.day, "01");
    }

    #[test]
    fn test_date_partitioned_missing_segments_degrade() {
        let metadata = parsed(dated().interpret("inbound/clientA/2024/track1.mp3", now()));
        assert_eq!(metadata.client_id, "clientA");
        assert_eq!(metadata.file_name, "track1.mp3");
        let partition = metadata.partition.unwrap();
        assert_eq!(partition.year, "2024");
        assert_eq!(partition.month, UNKNOWN_PARTITION);
        assert_eq!(partition.day, UNKNOWN_PARTITION);

        // the file name is never mistaken for a date segment
        let metadata = parsed(dated().interpret("inbound/2024.mp3", now()));
        assert_eq!(metadata.client_id, "UnknownClient");
        assert_eq!(metadata.partition.unwrap().year, UNKNOWN_PARTITION);
    }

    #[test]
    fn test_interpretation_is_deterministic_apart_from_timestamp() {
        let later = now() + chrono::Duration::seconds(5);
        let a = parsed(dated().interpret("inbound/clientA/2024/05/01/track1.mp3", now()));
        let b = parsed(dated().interpret("inbound/clientA/2024/05/01/track1.mp3", later));

        assert_eq!(a.file_name, b.file_name);
        assert_eq!(a.client_id, b.client_id);
        assert_eq!(a.partition, b.partition);
        assert_ne!(a.upload_timestamp, b.upload_timestamp);
    }

    #[test]
    fn test_parsed_file_name_is_never_empty() {
        let keys = [
            "audiofiles/a.mp3",
            "audiofiles/c/",
            "audiofiles//",
            "audiofiles/c/d/e",
            "audiofiles/%20",
            "audiofiles/c/+",
        ];
        for key in keys {
            if let Interpretation::Parsed(metadata) = simple().interpret(key, now()) {
                assert!(!metadata.file_name.is_empty(), "empty file name for {key}");
            }
        }
    }

    #[test]
    fn test_key_scheme_from_str() {
        assert_eq!("simple".parse::<KeyScheme>(), Ok(KeyScheme::Simple));
        assert_eq!(
            "DATE_PARTITIONED".parse::<KeyScheme>(),
            Ok(KeyScheme::DatePartitioned)
        );
        assert_eq!(
            "hourly".parse::<KeyScheme>(),
            Err(ConfigError::UnknownKeyScheme("hourly".to_string()))
        );
    }
}
