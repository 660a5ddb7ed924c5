// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Text normalization applied before vectorization: lower-case, split into
//! tokens, drop English stop words, rejoin with single spaces.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

const ENGLISH_STOP_WORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself",
    "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "that'll",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "s", "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn",
    "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn",
    "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan",
    "shan't", "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't",
    "wouldn", "wouldn't",
];

fn stop_words() -> &'static HashSet<&'static str> {
    static STOP_WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    STOP_WORDS.get_or_init(|| ENGLISH_STOP_WORDS.iter().copied().collect())
}

pub fn is_stop_word(token: &str) -> bool {
    stop_words().contains(token)
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\w+(?:'\w+)*|[^\w\s]").expect("static token pattern"))
}

/// Splits text into word tokens (word characters with inner apostrophes)
/// and single punctuation tokens. Whitespace is dropped.
pub fn tokenize(text: &str) -> Vec<&str> {
    token_pattern().find_iter(text).map(|m| m.as_str()).collect()
}

pub fn preprocess(text: &str) -> String {
    let lowered = text.to_lowercase();
    tokenize(&lowered)
        .into_iter()
        .filter(|token| !is_stop_word(token))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::{preprocess, tokenize};

    #[test]
    fn tokenize_separates_punctuation() {
        assert_eq!(
            tokenize("Great product, don't buy!"),
            vec!["Great", "product", ",", "don't", "buy", "!"]
        );
    }

    #[test]
    fn tokenize_keeps_inner_apostrophes_only() {
        assert_eq!(tokenize("rock'n'roll"), vec!["rock'n'roll"]);
        assert_eq!(tokenize("dogs' 'quoted"), vec!["dogs", "'", "'", "quoted"]);
        assert_eq!(tokenize("café_2go..."), vec!["café_2go", ".", ".", "."]);
        assert!(tokenize(" \t\n").is_empty());
    }

    #[test]
    fn preprocess_lowercases_and_drops_stop_words() {
        assert_eq!(
            preprocess("This is NOT a great Product"),
            "great product"
        );
        assert_eq!(preprocess("I don't smoke."), "smoke .");
    }

    #[test]
    fn preprocess_of_only_stop_words_is_empty() {
        assert_eq!(preprocess("it is what it is"), "");
        assert_eq!(preprocess(""), "");
    }
}
