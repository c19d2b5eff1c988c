//! Record formatter.
//!
//! Turns interpreted lines into coloured text or JSON objects.

use std::collections::HashSet;

use chrono::{DateTime, Local};
use colored::Colorize;

use crate::interpreter::{Line, RecordGroup};

pub struct RecordFormatter {
    show_timestamps: bool,
    json_format: bool,
    filters: Option<HashSet<RecordGroup>>,
}

impl RecordFormatter {
    pub fn new(show_timestamps: bool, json_format: bool) -> Self {
        Self {
            show_timestamps,
            json_format,
            filters: None,
        }
    }

    /// Restricts output to the named groups. Returns the names that were not
    /// recognised.
    pub fn set_filters(&mut self, names: &[String]) -> Vec<String> {
        let mut filters = HashSet::new();
        let mut unknown = Vec::new();
        for name in names {
            match RecordGroup::parse(name) {
                Some(group) => {
                    filters.insert(group);
                }
                None => unknown.push(name.clone()),
            }
        }
        self.filters = Some(filters);
        unknown
    }

    /// Formats `line`, or returns `None` when it is filtered out.
    pub fn format(&self, line: &Line, received: DateTime<Local>) -> Option<String> {
        if let Some(filters) = &self.filters {
            if !filters.contains(&line.group) {
                return None;
            }
        }

        let text = if self.json_format {
            self.format_json(line, received)
        } else {
            self.format_text(line, received)
        };
        Some(text)
    }

    fn format_text(&self, line: &Line, received: DateTime<Local>) -> String {
        let name = match line.group {
            RecordGroup::Action => line.name.bright_green(),
            RecordGroup::Timer => line.name.bright_yellow(),
            RecordGroup::Queue => line.name.bright_cyan(),
            RecordGroup::Pool => line.name.bright_magenta(),
            RecordGroup::Scheduler => line.name.bright_white(),
            RecordGroup::Info => line.name.yellow(),
            RecordGroup::User => line.name.white(),
        };
        let name = if line.name.ends_with("EXHAUSTED")
            || line.name.ends_with("FULL")
            || line.name.ends_with("DROPPED")
        {
            name.bright_red().bold()
        } else {
            name
        };

        let stamp = if self.show_timestamps {
            let target = line
                .timestamp_us
                .map_or_else(|| "--------".to_owned(), |us| format!("{us:08}"));
            format!("{} [{target}] ", received.format("%H:%M:%S%.3f"))
                .dimmed()
                .to_string()
        } else {
            String::new()
        };

        format!("{stamp}{name:16} {}", line.text)
    }

    fn format_json(&self, line: &Line, received: DateTime<Local>) -> String {
        let json = serde_json::json!({
            "received": received.to_rfc3339(),
            "seq": line.seq,
            "timestamp_us": line.timestamp_us,
            "type": line.name,
            "group": format!("{:?}", line.group),
            "text": line.text,
        });
        json.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(group: RecordGroup) -> Line {
        Line {
            seq: 4,
            timestamp_us: Some(1500),
            group,
            name: "EQ_POST",
            text: "q=0 len=1".to_owned(),
        }
    }

    #[test]
    fn filters_drop_other_groups() {
        let mut formatter = RecordFormatter::new(false, false);
        let unknown = formatter.set_filters(&["eq".to_owned(), "bogus".to_owned()]);
        assert_eq!(unknown, vec!["bogus".to_owned()]);

        assert!(formatter.format(&line(RecordGroup::Queue), Local::now()).is_some());
        assert!(formatter.format(&line(RecordGroup::Pool), Local::now()).is_none());
    }

    #[test]
    fn json_output_carries_every_field() {
        let formatter = RecordFormatter::new(true, true);
        let text = formatter
            .format(&line(RecordGroup::Queue), Local::now())
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["seq"], 4);
        assert_eq!(value["timestamp_us"], 1500);
        assert_eq!(value["type"], "EQ_POST");
        assert_eq!(value["group"], "Queue");
        assert_eq!(value["text"], "q=0 len=1");
    }
}
