// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::ops::ControlFlow;

use colored::Colorize;

use crate::config::ViewConfig;
use crate::error::StoreError;
use crate::store::RecordReader;
use crate::types::NodeRecord;

const IP_WIDTH: usize = 15;
const NAME_WIDTH: usize = 20;
const RTT_WIDTH: usize = 40;

/// Filters and ranks the records of a collection run.
#[derive(Clone, Debug)]
pub struct QueryView {
    /// Records with a higher packet loss percentage are left out. Equal is kept.
    pub max_loss: f64,
    /// Number of records to keep after ranking, `0` for all of them.
    pub top: usize,
}

impl From<&ViewConfig> for QueryView {
    fn from(config: &ViewConfig) -> Self {
        Self {
            max_loss: config.max_loss,
            top: config.top,
        }
    }
}

impl QueryView {
    /// Reads every record, keeping the ones under the loss threshold.
    pub fn load(&self, reader: &RecordReader) -> Result<Vec<NodeRecord>, StoreError> {
        let mut kept = vec![];
        reader.iterate(|record| {
            if record.ping.packet_loss <= self.max_loss {
                kept.push(record);
            }
            ControlFlow::Continue(())
        })?;
        Ok(self.rank(kept))
    }

    /// Applies the loss filter, then sorts by average round trip time and keeps the top entries.
    /// Records with equal times keep their relative order.
    pub fn select(&self, records: impl IntoIterator<Item = NodeRecord>) -> Vec<NodeRecord> {
        let kept = records
            .into_iter()
            .filter(|record| record.ping.packet_loss <= self.max_loss)
            .collect();
        self.rank(kept)
    }

    fn rank(&self, mut records: Vec<NodeRecord>) -> Vec<NodeRecord> {
        records.sort_by_key(|record| record.ping.avg_rtt);
        if self.top > 0 {
            records.truncate(self.top);
        }
        records
    }

    /// Loads, ranks and prints the records behind `reader`, one line each.
    pub fn print(&self, reader: &RecordReader) -> Result<usize, StoreError> {
        let records = self.load(reader)?;
        for (rank, record) in records.iter().enumerate() {
            println!("{}", format_line(rank, record, true));
        }
        Ok(records.len())
    }
}

/// `#rank:: ip org (cc) -> rtt (loss) (H hops, S success, N named)`
pub fn render_line(rank: usize, record: &NodeRecord) -> String {
    format_line(rank, record, false)
}

fn format_line(rank: usize, record: &NodeRecord, paint: bool) -> String {
    let name = fixed_width(&record.origin.name, NAME_WIDTH);
    let name = if paint {
        name.bright_green().to_string()
    } else {
        name
    };

    let loss = format_loss(record.ping.packet_loss);
    let loss = if paint && record.ping.packet_loss != 0.0 {
        loss.truecolor(255, 165, 0).to_string()
    } else {
        loss
    };

    format!(
        "#{rank}:: {} {name} ({}) -> {} ({loss}) ({} hops, {} success, {} named)",
        fixed_width(&record.origin.ip.to_string(), IP_WIDTH),
        record.origin.country,
        fixed_width(
            &humantime::format_duration(record.ping.avg_rtt).to_string(),
            RTT_WIDTH
        ),
        record.traceroute.len(),
        record.hops_answered(),
        record.hops_named(),
    )
}

pub fn format_loss(loss: f64) -> String {
    if loss == 0.0 {
        "no loss".to_string()
    } else {
        format!("{loss}% loss")
    }
}

/// Pads `s` with spaces, or cuts it, to exactly `width` characters.
fn fixed_width(s: &str, width: usize) -> String {
    format!("{:<width$.width$}", s)
}
