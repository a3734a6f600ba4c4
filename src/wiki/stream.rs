//! Server-sent-events reader for the recent-changes feed.
//!
//! Yields [`ChangeEvent`]s for exactly one page on one wiki; everything
//! else on the shared firehose is filtered out here. The iterator ends on
//! transport EOF or error, which a continuous task treats as the end of
//! its run (restart policy lives outside the process).

use std::io::BufRead;

use serde_json::Value;
use tracing::{debug, warn};

use crate::wiki::api::ChangeEvent;

/// Iterator over change events for a single page.
pub struct ChangeStream<R: BufRead> {
    reader: R,
    page_title: String,
    dbname: String,
}

impl<R: BufRead> ChangeStream<R> {
    pub fn new(reader: R, page_title: String, dbname: String) -> Self {
        Self {
            reader,
            page_title,
            dbname,
        }
    }
}

impl<R: BufRead> Iterator for ChangeStream<R> {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<ChangeEvent> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    debug!("change stream closed by server");
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "change stream read error");
                    return None;
                }
            }

            let Some(data) = line.trim_end().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data.is_empty() {
                continue;
            }

            let event: Value = match serde_json::from_str(data) {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "skipping malformed stream event");
                    continue;
                }
            };
            if event["wiki"].as_str() != Some(self.dbname.as_str())
                || event["title"].as_str() != Some(self.page_title.as_str())
            {
                continue;
            }

            return Some(ChangeEvent {
                title: self.page_title.clone(),
                wiki: self.dbname.clone(),
                user: event["user"].as_str().unwrap_or("").to_owned(),
                comment: event["comment"].as_str().unwrap_or("").to_owned(),
            });
        }
    }
}
