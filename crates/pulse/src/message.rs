//! Metric Messages
//!
//! A `Message` is one sample produced by a plugin run. It is rendered onto the
//! wire as a single text line: `<apiKey>.<name> <value> <timestamp>\n`.

use std::fmt;

/// A metric sample produced by one plugin run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    name: String,
    /// Passed through verbatim, never parsed as a number
    value: String,
    /// Seconds since the epoch, assigned when the run finished
    timestamp: i64,
}

impl Message {
    pub fn new(name: impl Into<String>, value: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            timestamp,
        }
    }

    /// Build a message from plugin output, stamped with `timestamp`.
    ///
    /// Returns `None` unless the output is exactly `<name> <value>` with a
    /// single space separator. One trailing line terminator is tolerated.
    pub fn parse(output: &str, timestamp: i64) -> Option<Self> {
        let line = output
            .strip_suffix('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .unwrap_or(output);

        // Anything left over would break the newline framing
        if line.contains(['\n', '\r']) {
            return None;
        }

        let mut parts = line.split(' ');
        let (Some(name), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return None;
        };

        if name.is_empty() || value.is_empty() {
            return None;
        }

        Some(Self::new(name, value, timestamp))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Render the wire line for this message under the given key prefix
    pub fn to_line(&self, api_key: &str) -> String {
        WireLine {
            api_key,
            message: self,
        }
        .to_string()
    }
}

/// Display adapter for the wire format
pub struct WireLine<'a> {
    pub api_key: &'a str,
    pub message: &'a Message,
}

impl fmt::Display for WireLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}.{} {} {}",
            self.api_key, self.message.name, self.message.value, self.message.timestamp
        )
    }
}
