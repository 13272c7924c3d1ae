use crate::error::ConfigError;
use crate::interpreter::{KeyScheme, UNKNOWN_PARTITION};
use crate::metadata::{DatePartition, Metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    ClientId,
    Year,
    Month,
    Day,
    FileName,
    FileStem,
    Timestamp,
}

impl Placeholder {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "client_id" => Placeholder::ClientId,
            "year" => Placeholder::Year,
            "month" => Placeholder::Month,
            "day" => Placeholder::Day,
            "file_name" => Placeholder::FileName,
            "file_stem" => Placeholder::FileStem,
            "timestamp" => Placeholder::Timestamp,
            _ => return None,
        })
    }

    fn needs_date_partition(&self) -> bool {
        matches!(
            self,
            Placeholder::Year | Placeholder::Month | Placeholder::Day
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// Maps a record to the key of the ledger it belongs in.
///
/// A template without placeholders is a single global ledger, e.g.
/// `metadata/metadata.csv`. Placeholders partition ledgers, e.g.
/// `metadata/{client_id}/{year}/{month}/{day}.csv` for one ledger per
/// client-day or `metadata/{client_id}/{file_stem}-{timestamp}.csv` for one
/// per object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerLocator {
    template: String,
    segments: Vec<Segment>,
}

impl LedgerLocator {
    pub fn parse(template: &str, scheme: KeyScheme) -> Result<Self, ConfigError> {
        let template = template.trim().trim_start_matches('/');
        if template.is_empty() {
            return Err(ConfigError::Empty {
                name: "LEDGER_LOCATION",
            });
        }

        let mut segments = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after_open = &rest[open + 1..];
            let Some(close) = after_open.find('}') else {
                return Err(ConfigError::UnterminatedPlaceholder(template.to_string()));
            };
            let name = &after_open[..close];
            let placeholder = Placeholder::parse(name)
                .ok_or_else(|| ConfigError::UnknownPlaceholder(name.to_string()))?;
            if placeholder.needs_date_partition() && scheme != KeyScheme::DatePartitioned {
                return Err(ConfigError::PlaceholderNeedsDatePartition(name.to_string()));
            }
            segments.push(Segment::Placeholder(placeholder));
            rest = &after_open[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Literal text every located key starts with, empty when the template
    /// opens with a placeholder
    pub fn literal_prefix(&self) -> &str {
        match self.segments.first() {
            Some(Segment::Literal(text)) => text,
            _ => "",
        }
    }

    /// True when every record lands in the same ledger
    pub fn is_fixed(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    pub fn locate(&self, record: &Metadata) -> String {
        let partition_field = |pick: fn(&DatePartition) -> &str| {
            record
                .partition
                .as_ref()
                .map(pick)
                .unwrap_or(UNKNOWN_PARTITION)
                .to_string()
        };

        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Placeholder(Placeholder::ClientId) => record.client_id.clone(),
                Segment::Placeholder(Placeholder::Year) => partition_field(|p| p.year.as_str()),
                Segment::Placeholder(Placeholder::Month) => partition_field(|p| p.month.as_str()),
                Segment::Placeholder(Placeholder::Day) => partition_field(|p| p.day.as_str()),
                Segment::Placeholder(Placeholder::FileName) => record.file_name.clone(),
                Segment::Placeholder(Placeholder::FileStem) => record.file_stem().to_string(),
                Segment::Placeholder(Placeholder::Timestamp) => record.compact_timestamp(),
            })
            .collect()
    }
}
