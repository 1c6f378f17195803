//! The interface through which a host program supplies its Map and Reduce
//! functions, plus a hard-coded word-count application used as the
//! crate's default (and as the fixture for the end-to-end test).
//!
//! These are opaque callables as far as the coordinator and the dispatch
//! machinery are concerned: we accept them behind a trait object rather
//! than a generic key/value type, since the wire and file formats are
//! specified over strings (spec §9).

use crate::mr::types::KeyValue;

pub trait MapFn: Send + Sync {
    fn map(&self, filename: &str, contents: &str) -> Vec<KeyValue>;
}

pub trait ReduceFn: Send + Sync {
    fn reduce(&self, key: &str, values: &[String]) -> String;
}

/// Word Count application
pub mod wc {
    use super::{KeyValue, MapFn, ReduceFn};

    pub struct WordCountMap;

    impl MapFn for WordCountMap {
        fn map(&self, _filename: &str, contents: &str) -> Vec<KeyValue> {
            contents
                .split_whitespace()
                .map(|word| KeyValue::new(word.to_string(), "1".to_string()))
                .collect()
        }
    }

    pub struct WordCountReduce;

    impl ReduceFn for WordCountReduce {
        fn reduce(&self, _key: &str, values: &[String]) -> String {
            values.len().to_string()
        }
    }
}

// TODO: Add more functions for MapReduce applications here

#[cfg(test)]
mod tests {
    use super::wc::{WordCountMap, WordCountReduce};
    use super::{MapFn, ReduceFn};

    #[test]
    fn word_count_map_emits_one_pair_per_word() {
        let pairs = WordCountMap.map("a.txt", "the cat sat");
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|kv| kv.value == "1"));
    }

    #[test]
    fn word_count_reduce_sums_occurrences() {
        let values = vec!["1".to_string(), "1".to_string()];
        assert_eq!(WordCountReduce.reduce("the", &values), "2");
    }
}
