//! Flat-file panel provider: one wide CSV per data item.

use crate::data::{DerivedSignal, Frame, SignalPanel};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Obtains (and persists) panel data from flat CSV files.
///
/// A file represents an individual item of the resulting panel: the
/// relative file name is the item name (e.g. `NET_INCOME.csv`), the
/// first column is the date and the remaining columns are tickers.
pub struct FlatFileDataService {
    directory: PathBuf,
}

impl FlatFileDataService {
    /// Create a provider rooted at the given directory
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Load the given items for the given tickers.
    ///
    /// Missing items or tickers are an error. Frames are aligned on the
    /// union of their date axes, forward-filled, and trimmed to the
    /// first date at which every item and ticker is observed.
    pub fn get_data(&self, items: &[String], tickers: &[String]) -> Result<SignalPanel> {
        self.get_data_with_derived(items, tickers, &[])
    }

    /// As [`get_data`](Self::get_data), additionally computing derived
    /// ratio signals from their raw inputs. Raw inputs that were not
    /// requested directly are loaded but not included in the panel.
    pub fn get_data_with_derived(
        &self,
        items: &[String],
        tickers: &[String],
        derived: &[DerivedSignal],
    ) -> Result<SignalPanel> {
        let mut raw_items: BTreeSet<String> = items.iter().cloned().collect();
        for signal in derived {
            raw_items.insert(signal.numerator.clone());
            raw_items.insert(signal.denominator.clone());
        }

        let mut frames = BTreeMap::new();
        for item in &raw_items {
            frames.insert(item.clone(), self.read_frame(item, tickers)?);
        }
        let mut frames = align(frames);

        for signal in derived {
            let numerator = &frames[&signal.numerator];
            let denominator = &frames[&signal.denominator];
            let frame = signal.compute(numerator, denominator)?;
            frames.insert(signal.name.clone(), frame);
        }

        // Keep only what was asked for.
        let wanted: BTreeSet<&String> = items
            .iter()
            .chain(derived.iter().map(|d| &d.name))
            .collect();
        frames.retain(|name, _| wanted.contains(name));

        let frames = trim_leading_gaps(frames);
        Ok(SignalPanel::new(frames)?)
    }

    /// Write one CSV per signal into the provider's directory.
    pub fn persist(&self, panel: &SignalPanel) -> Result<()> {
        for name in panel.signal_names() {
            let frame = panel.signal(name).expect("name from the panel itself");
            let path = self.directory.join(format!("{}.csv", name));
            let mut writer = csv::Writer::from_path(&path)
                .with_context(|| format!("creating {}", path.display()))?;

            let mut header = vec!["date".to_string()];
            header.extend(frame.tickers().iter().cloned());
            writer.write_record(&header)?;

            for &date in frame.dates() {
                let mut record = vec![date.to_string()];
                for ticker in frame.tickers() {
                    let value = frame.value(date, ticker).unwrap_or(f64::NAN);
                    record.push(if value.is_finite() {
                        value.to_string()
                    } else {
                        String::new()
                    });
                }
                writer.write_record(&record)?;
            }
            writer.flush()?;
        }
        Ok(())
    }

    fn read_frame(&self, item: &str, tickers: &[String]) -> Result<Frame> {
        let path = self.directory.join(format!("{}.csv", item));
        let mut reader =
            csv::Reader::from_path(&path).with_context(|| format!("reading {}", path.display()))?;

        let headers = reader.headers()?.clone();
        let mut columns = Vec::with_capacity(tickers.len());
        let mut missing = Vec::new();
        for ticker in tickers {
            match headers.iter().skip(1).position(|h| h == ticker) {
                Some(pos) => columns.push(pos + 1),
                None => missing.push(ticker.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(anyhow!("{}: missing tickers: {:?}", item, missing));
        }

        let mut rows: Vec<(NaiveDate, Vec<f64>)> = Vec::new();
        for record in reader.records() {
            let record = record?;
            let date = NaiveDate::parse_from_str(&record[0], "%Y-%m-%d")
                .with_context(|| format!("{}: bad date {:?}", item, &record[0]))?;
            let values = columns
                .iter()
                .map(|&col| {
                    let field = record.get(col).unwrap_or("");
                    if field.is_empty() {
                        Ok(f64::NAN)
                    } else {
                        field
                            .parse::<f64>()
                            .with_context(|| format!("{}: bad value {:?} at {}", item, field, date))
                    }
                })
                .collect::<Result<Vec<f64>>>()?;
            rows.push((date, values));
        }
        rows.sort_by_key(|(date, _)| *date);

        let dates = rows.iter().map(|(date, _)| *date).collect();
        let values = rows.into_iter().map(|(_, values)| values).collect();
        Ok(Frame::from_rows(dates, tickers.to_vec(), values)?)
    }
}

/// Reindex all frames onto the union of their date axes and forward-fill
/// the gaps.
fn align(frames: BTreeMap<String, Frame>) -> BTreeMap<String, Frame> {
    let union: BTreeSet<NaiveDate> = frames
        .values()
        .flat_map(|frame| frame.dates().iter().copied())
        .collect();
    let dates: Vec<NaiveDate> = union.into_iter().collect();

    frames
        .into_iter()
        .map(|(name, frame)| {
            let mut reindexed = reindex(&frame, &dates);
            reindexed.forward_fill();
            (name, reindexed)
        })
        .collect()
}

fn reindex(frame: &Frame, dates: &[NaiveDate]) -> Frame {
    let cols = frame.tickers().len();
    let mut values = Array2::from_elem((dates.len(), cols), f64::NAN);
    for (row, &date) in dates.iter().enumerate() {
        if let Some(existing) = frame.row(date) {
            values.row_mut(row).assign(&existing);
        }
    }
    Frame::new(dates.to_vec(), frame.tickers().to_vec(), values)
        .expect("reindexed shape matches by construction")
}

/// Drop leading dates on which any signal still has an unobserved value
/// (forward fill cannot reach before a ticker's first observation).
fn trim_leading_gaps(frames: BTreeMap<String, Frame>) -> BTreeMap<String, Frame> {
    let Some(dates) = frames.values().next().map(|f| f.dates().to_vec()) else {
        return frames;
    };

    let first_complete = dates.iter().position(|&date| {
        frames.values().all(|frame| {
            frame
                .row(date)
                .map(|row| row.iter().all(|v| v.is_finite()))
                .unwrap_or(false)
        })
    });

    match first_complete {
        Some(0) | None => frames,
        Some(start) => frames
            .into_iter()
            .map(|(name, frame)| {
                let trimmed = frame.slice_dates(dates[start], *dates.last().unwrap());
                (name, trimmed)
            })
            .collect(),
    }
}
