//! Streaming readers for upstream dump files.
//!
//! Line-delimited files are read one line at a time; whole-file arrays are
//! walked element by element so a multi-gigabyte dump never sits in memory.

use std::fmt;
use std::io::{self, BufRead, BufReader, Lines, Read};
use std::marker::PhantomData;

use anyhow::{anyhow, Result};
use serde::de::{DeserializeOwned, Deserializer as _, Error as _, SeqAccess, Visitor};
use serde_json::Value;
use tracing::warn;

/// Records handed to the caller and records dropped as malformed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub records: u64,
    pub malformed: u64,
}

/// Iterator over a JSON-lines stream. Blank lines are skipped; lines that
/// fail to parse are logged, counted and skipped.
pub struct JsonLines<R, T> {
    lines: Lines<BufReader<R>>,
    line_no: u64,
    stats: ReadStats,
    _marker: PhantomData<T>,
}

impl<R: Read, T: DeserializeOwned> JsonLines<R, T> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            line_no: 0,
            stats: ReadStats::default(),
            _marker: PhantomData,
        }
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }
}

impl<R: Read, T: DeserializeOwned> Iterator for JsonLines<R, T> {
    type Item = io::Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(trimmed) {
                Ok(record) => {
                    self.stats.records += 1;
                    return Some(Ok(record));
                }
                Err(e) => {
                    self.stats.malformed += 1;
                    warn!("line {}: malformed record skipped: {}", self.line_no, e);
                }
            }
        }
    }
}

/// Walk a top-level JSON array, calling `visit` for every element that
/// deserializes as `T`. An error from `visit` stops the walk and is
/// returned unchanged.
pub fn for_each_in_array<R, T, F>(reader: R, mut visit: F) -> Result<ReadStats>
where
    R: Read,
    T: DeserializeOwned,
    F: FnMut(T) -> Result<()>,
{
    let mut failure = None;
    let mut de = serde_json::Deserializer::from_reader(BufReader::new(reader));
    let walked = (&mut de).deserialize_seq(ArrayVisitor {
        visit: &mut visit,
        failure: &mut failure,
        _marker: PhantomData,
    });
    match walked {
        Ok(stats) => {
            de.end()?;
            Ok(stats)
        }
        Err(e) => Err(failure.take().unwrap_or_else(|| anyhow!("malformed JSON array: {}", e))),
    }
}

struct ArrayVisitor<'a, T, F> {
    visit: &'a mut F,
    failure: &'a mut Option<anyhow::Error>,
    _marker: PhantomData<T>,
}

impl<'de, T, F> Visitor<'de> for ArrayVisitor<'_, T, F>
where
    T: DeserializeOwned,
    F: FnMut(T) -> Result<()>,
{
    type Value = ReadStats;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON array of records")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<ReadStats, A::Error> {
        let mut stats = ReadStats::default();
        let mut index = 0u64;
        while let Some(element) = seq.next_element::<Value>()? {
            index += 1;
            match serde_json::from_value::<T>(element) {
                Ok(record) => {
                    stats.records += 1;
                    if let Err(e) = (self.visit)(record) {
                        *self.failure = Some(e);
                        return Err(A::Error::custom("aborted by caller"));
                    }
                }
                Err(e) => {
                    stats.malformed += 1;
                    warn!("element {}: malformed record skipped: {}", index, e);
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: i64,
    }

    #[test]
    fn json_lines_skip_blank_and_malformed() {
        let input = "{\"id\": 1}\n\n   \nnot json\n{\"id\": 2}\n{\"name\": \"x\"}\n";
        let mut lines = JsonLines::<_, Item>::new(input.as_bytes());
        let ids: Vec<i64> = lines.by_ref().map(|r| r.unwrap().id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(
            lines.stats(),
            ReadStats {
                records: 2,
                malformed: 2
            }
        );
    }

    #[test]
    fn array_elements_are_visited_in_order() {
        let input = r#"[{"id": 3}, {"id": "bad"}, {"id": 4}]"#;
        let mut seen = Vec::new();
        let stats = for_each_in_array(input.as_bytes(), |item: Item| {
            seen.push(item.id);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![3, 4]);
        assert_eq!(stats.malformed, 1);
    }

    #[test]
    fn callback_error_stops_the_walk() {
        let input = r#"[{"id": 1}, {"id": 2}, {"id": 3}]"#;
        let mut seen = 0;
        let err = for_each_in_array(input.as_bytes(), |item: Item| {
            seen += 1;
            if item.id == 2 {
                return Err(anyhow!("store unreachable"));
            }
            Ok(())
        })
        .unwrap_err();
        assert_eq!(seen, 2);
        assert!(err.to_string().contains("store unreachable"));
    }

    #[test]
    fn non_array_input_is_an_error() {
        let result = for_each_in_array("{\"id\": 1}".as_bytes(), |_: Item| Ok(()));
        assert!(result.is_err());
    }
}
