//! Schedule queries and the stops file they are loaded from.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Metros,
    Rers,
    Tramways,
    Buses,
    Noctiliens,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Metros => "metros",
            TransportType::Rers => "rers",
            TransportType::Tramways => "tramways",
            TransportType::Buses => "buses",
            TransportType::Noctiliens => "noctiliens",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "metros" => Ok(TransportType::Metros),
            "rers" => Ok(TransportType::Rers),
            "tramways" => Ok(TransportType::Tramways),
            "buses" => Ok(TransportType::Buses),
            "noctiliens" => Ok(TransportType::Noctiliens),
            other => Err(anyhow::anyhow!("unknown transport type '{}'", other)),
        }
    }
}

/// Direction of travel on a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Way {
    A,
    R,
    #[serde(rename = "A+R")]
    AR,
}

impl Way {
    pub fn as_str(&self) -> &'static str {
        match self {
            Way::A => "A",
            Way::R => "R",
            Way::AR => "A+R",
        }
    }
}

impl fmt::Display for Way {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Way {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "A" => Ok(Way::A),
            "R" => Ok(Way::R),
            "A+R" => Ok(Way::AR),
            other => Err(anyhow::anyhow!("unknown way '{}'", other)),
        }
    }
}

/// One schedule request: a station on a line, in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub transport_type: TransportType,
    pub line_code: String,
    pub station_name: String,
    pub way: Way,
}

impl Query {
    pub fn new(
        transport_type: TransportType,
        line_code: impl Into<String>,
        station_name: impl Into<String>,
        way: Way,
    ) -> Self {
        Self {
            transport_type,
            line_code: line_code.into(),
            station_name: station_name.into(),
            way,
        }
    }
}

/// Reads the stops file (one `transport_type,line_code,station_name,way`
/// per line, no header) and returns the queries in random order.
pub fn load_queries(path: impl AsRef<Path>) -> Result<Vec<Query>> {
    let path = path.as_ref();
    debug!(path = %path.display(), "Loading stops file");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open stops file {}", path.display()))?;

    let mut queries = Vec::new();
    for (line, record) in reader.deserialize::<Query>().enumerate() {
        let query = record
            .with_context(|| format!("invalid query on line {} of {}", line + 1, path.display()))?;
        queries.push(query);
    }

    debug!(count = queries.len(), "Queries loaded");
    queries.shuffle(&mut rand::rng());

    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_way_round_trips_through_str() {
        assert_eq!("A+R".parse::<Way>().unwrap(), Way::AR);
        assert_eq!(Way::AR.to_string(), "A+R");
        assert!("B".parse::<Way>().is_err());
    }

    #[test]
    fn test_transport_type_rejects_unknown() {
        assert_eq!("buses".parse::<TransportType>().unwrap(), TransportType::Buses);
        assert!("boats".parse::<TransportType>().is_err());
    }

    #[test]
    fn test_load_queries_reads_every_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buses,187,Division Leclerc - Camille Desmoulins,A").unwrap();
        writeln!(file, "metros,1,Chateau de Vincennes,A+R").unwrap();
        writeln!(file, "rers,B,Denfert Rochereau,R").unwrap();

        let mut queries = load_queries(file.path()).unwrap();
        assert_eq!(queries.len(), 3);

        queries.sort_by(|a, b| a.line_code.cmp(&b.line_code));
        assert_eq!(
            queries[0],
            Query::new(TransportType::Metros, "1", "Chateau de Vincennes", Way::AR)
        );
        assert_eq!(queries[1].station_name, "Division Leclerc - Camille Desmoulins");
        assert_eq!(queries[2].way, Way::R);
    }

    #[test]
    fn test_load_queries_rejects_bad_row() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buses,187,Somewhere,A").unwrap();
        writeln!(file, "ferries,1,Quay,A").unwrap();

        let err = load_queries(file.path()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
