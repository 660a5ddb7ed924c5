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
//! Reversible textual encoding of registry keys.
//!
//! A ticket is the literal tuple `(kind, command, (segment, ...))`, for example
//! `(1, None, ('ToPython',))` or `(2, b'result-7', ())`. Commands are byte
//! literals, path segments are quoted strings. `decode_ticket` accepts exactly
//! what `encode_ticket` produces plus double-quoted strings and byte-literal
//! path segments.

use std::fmt::Write as _;

use arrow_flight::Ticket;
use bytes::Bytes;

use crate::common::status::ServiceError;
use crate::common::types::{DescriptorKind, RegistryKey};

pub fn encode_key(key: &RegistryKey) -> String {
    let mut out = String::new();
    out.push('(');
    let _ = write!(out, "{}", key.kind());
    out.push_str(", ");
    match key.command() {
        Some(cmd) => write_bytes_literal(&mut out, cmd),
        None => out.push_str("None"),
    }
    out.push_str(", (");
    for (idx, segment) in key.path().iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        write_str_literal(&mut out, segment);
    }
    if key.path().len() == 1 {
        out.push(',');
    }
    out.push_str("))");
    out
}

pub fn encode_ticket(key: &RegistryKey) -> Ticket {
    Ticket::new(encode_key(key))
}

pub fn decode_ticket(ticket: &[u8]) -> Result<RegistryKey, ServiceError> {
    let text = std::str::from_utf8(ticket)
        .map_err(|e| ServiceError::invalid_argument(format!("ticket is not utf-8: {e}")))?;
    decode_key(text)
}

pub fn decode_key(text: &str) -> Result<RegistryKey, ServiceError> {
    let mut parser = Parser::new(text);
    let key = parser.parse_key()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error("trailing characters"));
    }
    Ok(key)
}

fn write_bytes_literal(out: &mut String, bytes: &[u8]) {
    out.push_str("b'");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push('\'');
}

fn write_str_literal(out: &mut String, s: &str) {
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, what: &str) -> ServiceError {
        ServiceError::invalid_argument(format!(
            "malformed ticket {:?} at offset {}: {what}",
            self.input, self.pos
        ))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), ServiceError> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            _ => Err(self.error(&format!("expected '{want}'"))),
        }
    }

    fn eat(&mut self, want: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(want) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn parse_key(&mut self) -> Result<RegistryKey, ServiceError> {
        self.expect('(')?;
        let kind = self.parse_kind()?;
        self.expect(',')?;
        let command = self.parse_command()?;
        self.expect(',')?;
        let path = self.parse_path()?;
        // Tolerate a trailing comma inside the outer tuple.
        self.eat(',');
        self.expect(')')?;
        RegistryKey::from_parts(kind, command, path)
    }

    fn parse_kind(&mut self) -> Result<DescriptorKind, ServiceError> {
        self.skip_ws();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '-') {
            self.bump();
        }
        let raw = &self.input[start..self.pos];
        let value = raw
            .parse::<i32>()
            .map_err(|_| self.error("expected descriptor kind"))?;
        DescriptorKind::try_from(value)
    }

    fn parse_command(&mut self) -> Result<Option<Bytes>, ServiceError> {
        self.skip_ws();
        if self.input[self.pos..].starts_with("None") {
            self.pos += "None".len();
            return Ok(None);
        }
        if self.peek() != Some('b') {
            return Err(self.error("expected None or a byte literal"));
        }
        self.bump();
        Ok(Some(Bytes::from(self.parse_quoted_bytes()?)))
    }

    fn parse_path(&mut self) -> Result<Vec<String>, ServiceError> {
        self.expect('(')?;
        let mut segments = Vec::new();
        loop {
            if self.eat(')') {
                return Ok(segments);
            }
            if !segments.is_empty() {
                self.expect(',')?;
                if self.eat(')') {
                    return Ok(segments);
                }
            }
            segments.push(self.parse_segment()?);
        }
    }

    fn parse_segment(&mut self) -> Result<String, ServiceError> {
        self.skip_ws();
        if self.peek() == Some('b') {
            self.bump();
        }
        let raw = self.parse_quoted_bytes()?;
        String::from_utf8(raw).map_err(|_| self.error("path segment is not utf-8"))
    }

    /// Parses a quoted literal into its raw bytes; `\xHH` yields one byte.
    fn parse_quoted_bytes(&mut self) -> Result<Vec<u8>, ServiceError> {
        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected quote")),
        };
        let mut out = Vec::new();
        loop {
            let c = self
                .bump()
                .ok_or_else(|| self.error("unterminated literal"))?;
            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                continue;
            }
            match self.bump() {
                Some('\\') => out.push(b'\\'),
                Some('\'') => out.push(b'\''),
                Some('"') => out.push(b'"'),
                Some('n') => out.push(b'\n'),
                Some('r') => out.push(b'\r'),
                Some('t') => out.push(b'\t'),
                Some('x') => {
                    let start = self.pos;
                    let hex = self
                        .input
                        .get(start..start + 2)
                        .ok_or_else(|| self.error("truncated \\x escape"))?;
                    let byte = u8::from_str_radix(hex, 16)
                        .map_err(|_| self.error("invalid \\x escape"))?;
                    self.pos += 2;
                    out.push(byte);
                }
                _ => return Err(self.error("unsupported escape")),
            }
        }
    }
}
