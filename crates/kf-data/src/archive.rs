//! Columnar bar archive.
//!
//! Bars live in hive-partitioned Parquet files:
//! `<root>/kline/frequency=<freq>/year=<YYYY>/data.parquet`.  Prices are
//! stored as Float64 columns alongside nullable indicator columns; the
//! archive is the system of record for historical bars and is read-only for
//! the trading core (the writer exists for ingest tooling and tests).

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Datelike, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use rayon::prelude::*;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use kf_types::{Bar, DataError, Frequency, Indicators, KfError, KfResult, Symbol};

const INDICATOR_COLUMNS: [&str; 11] = [
    "ma5",
    "ma10",
    "ma20",
    "ma60",
    "macd_dif",
    "macd_dea",
    "macd_histogram",
    "rsi_14",
    "boll_upper",
    "boll_middle",
    "boll_lower",
];

fn archive_error(e: impl std::fmt::Display) -> KfError {
    DataError::Archive(e.to_string()).into()
}

/// Parquet-backed bar storage with hive-style partitions.
#[derive(Debug, Clone)]
pub struct BarArchive {
    root: PathBuf,
}

impl BarArchive {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn partition_path(&self, frequency: Frequency, year: i32) -> PathBuf {
        self.root
            .join("kline")
            .join(format!("frequency={frequency}"))
            .join(format!("year={year}"))
            .join("data.parquet")
    }

    fn schema() -> Arc<Schema> {
        let mut fields = vec![
            Field::new("symbol", DataType::Utf8, false),
            Field::new(
                "timestamp",
                DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
                false,
            ),
            Field::new("frequency", DataType::Utf8, false),
            Field::new("open", DataType::Float64, false),
            Field::new("high", DataType::Float64, false),
            Field::new("low", DataType::Float64, false),
            Field::new("close", DataType::Float64, false),
            Field::new("volume", DataType::Int64, false),
            Field::new("amount", DataType::Float64, false),
        ];
        for name in INDICATOR_COLUMNS {
            fields.push(Field::new(name, DataType::Float64, true));
        }
        Arc::new(Schema::new(fields))
    }

    /// Write bars, grouped into their `(frequency, year)` partitions.  Each
    /// partition file is replaced wholesale.
    pub fn write_bars(&self, bars: &[Bar]) -> KfResult<()> {
        let mut partitions: BTreeMap<(Frequency, i32), Vec<&Bar>> = BTreeMap::new();
        for bar in bars {
            bar.validate()?;
            partitions
                .entry((bar.frequency, bar.timestamp.year()))
                .or_default()
                .push(bar);
        }

        for ((frequency, year), mut group) in partitions {
            group.sort_by_key(|bar| bar.timestamp);
            let path = self.partition_path(frequency, year);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let batch = Self::bars_to_batch(&group)?;
            let file = File::create(&path)?;
            let props = WriterProperties::builder().build();
            let mut writer =
                ArrowWriter::try_new(file, batch.schema(), Some(props)).map_err(archive_error)?;
            writer.write(&batch).map_err(archive_error)?;
            writer.close().map_err(archive_error)?;
            debug!(
                frequency = %frequency,
                year,
                rows = group.len(),
                path = %path.display(),
                "partition written"
            );
        }
        Ok(())
    }

    /// Read bars for one symbol within `[start, end]`, in timestamp order.
    /// Year partitions are loaded in parallel.
    pub fn read_bars(
        &self,
        symbol: &Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        frequency: Frequency,
    ) -> KfResult<Vec<Bar>> {
        if start > end {
            return Err(DataError::NoDataInRange {
                symbol: symbol.to_string(),
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            }
            .into());
        }

        let years: Vec<i32> = (start.year()..=end.year()).collect();
        let mut bars: Vec<Bar> = years
            .par_iter()
            .map(|year| self.read_partition(frequency, *year, Some(symbol)))
            .collect::<KfResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .filter(|bar| bar.timestamp >= start && bar.timestamp <= end)
            .collect();

        bars.sort_by_key(|bar| bar.timestamp);
        Ok(bars)
    }

    /// The most recent bar on record for a symbol, scanning partitions from
    /// the newest year backward.
    pub fn latest_bar(&self, symbol: &Symbol, frequency: Frequency) -> KfResult<Option<Bar>> {
        let mut years: Vec<i32> = self.available_years(frequency)?;
        years.sort_unstable_by(|a, b| b.cmp(a));

        for year in years {
            let bars = self.read_partition(frequency, year, Some(symbol))?;
            if let Some(latest) = bars.into_iter().max_by_key(|bar| bar.timestamp) {
                return Ok(Some(latest));
            }
        }
        Ok(None)
    }

    /// All symbols present in a frequency's partitions.
    pub fn symbols(&self, frequency: Frequency) -> KfResult<Vec<Symbol>> {
        let mut symbols = std::collections::BTreeSet::new();
        for year in self.available_years(frequency)? {
            for bar in self.read_partition(frequency, year, None)? {
                symbols.insert(bar.symbol.to_string());
            }
        }
        symbols.into_iter().map(|s| Symbol::parse(&s)).collect()
    }

    fn available_years(&self, frequency: Frequency) -> KfResult<Vec<i32>> {
        let dir = self.root.join("kline").join(format!("frequency={frequency}"));
        let mut years = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(years), // nothing archived yet
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(year) = name.strip_prefix("year=").and_then(|y| y.parse::<i32>().ok()) {
                years.push(year);
            }
        }
        years.sort_unstable();
        Ok(years)
    }

    fn read_partition(
        &self,
        frequency: Frequency,
        year: i32,
        symbol: Option<&Symbol>,
    ) -> KfResult<Vec<Bar>> {
        let path = self.partition_path(frequency, year);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(archive_error)?
            .build()
            .map_err(archive_error)?;

        let wanted = symbol.map(|s| s.to_string());
        let mut bars = Vec::new();
        for batch in reader {
            let batch = batch.map_err(archive_error)?;
            Self::batch_to_bars(&batch, wanted.as_deref(), &mut bars)?;
        }
        Ok(bars)
    }

    fn bars_to_batch(bars: &[&Bar]) -> KfResult<RecordBatch> {
        let symbols: Vec<String> = bars.iter().map(|b| b.symbol.to_string()).collect();
        let timestamps: Vec<i64> = bars.iter().map(|b| b.timestamp.timestamp_millis()).collect();
        let frequencies: Vec<String> = bars.iter().map(|b| b.frequency.to_string()).collect();
        let to_f64 = |d: Decimal| d.to_f64().unwrap_or(0.0);
        let opens: Vec<f64> = bars.iter().map(|b| to_f64(b.open)).collect();
        let highs: Vec<f64> = bars.iter().map(|b| to_f64(b.high)).collect();
        let lows: Vec<f64> = bars.iter().map(|b| to_f64(b.low)).collect();
        let closes: Vec<f64> = bars.iter().map(|b| to_f64(b.close)).collect();
        let volumes: Vec<i64> = bars.iter().map(|b| b.volume).collect();
        let amounts: Vec<f64> = bars.iter().map(|b| to_f64(b.amount)).collect();

        let mut arrays: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(symbols)),
            Arc::new(TimestampMillisecondArray::from(timestamps).with_timezone("UTC")),
            Arc::new(StringArray::from(frequencies)),
            Arc::new(Float64Array::from(opens)),
            Arc::new(Float64Array::from(highs)),
            Arc::new(Float64Array::from(lows)),
            Arc::new(Float64Array::from(closes)),
            Arc::new(Int64Array::from(volumes)),
            Arc::new(Float64Array::from(amounts)),
        ];

        for name in INDICATOR_COLUMNS {
            let values: Vec<Option<f64>> = bars
                .iter()
                .map(|b| {
                    b.indicators
                        .as_ref()
                        .and_then(|i| indicator_field(i, name))
                        .and_then(|d| d.to_f64())
                })
                .collect();
            arrays.push(Arc::new(Float64Array::from(values)));
        }

        RecordBatch::try_new(Self::schema(), arrays).map_err(archive_error)
    }

    fn batch_to_bars(
        batch: &RecordBatch,
        wanted_symbol: Option<&str>,
        out: &mut Vec<Bar>,
    ) -> KfResult<()> {
        let string_column = |name: &str| -> KfResult<&StringArray> {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| DataError::MissingColumn { column: name.to_string() }.into())
        };
        let f64_column = |name: &str| -> KfResult<&Float64Array> {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
                .ok_or_else(|| DataError::MissingColumn { column: name.to_string() }.into())
        };

        let symbols = string_column("symbol")?;
        let frequencies = string_column("frequency")?;
        let timestamps = batch
            .column_by_name("timestamp")
            .and_then(|c| c.as_any().downcast_ref::<TimestampMillisecondArray>())
            .ok_or_else(|| KfError::from(DataError::MissingColumn {
                column: "timestamp".to_string(),
            }))?;
        let volumes = batch
            .column_by_name("volume")
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
            .ok_or_else(|| KfError::from(DataError::MissingColumn {
                column: "volume".to_string(),
            }))?;
        let opens = f64_column("open")?;
        let highs = f64_column("high")?;
        let lows = f64_column("low")?;
        let closes = f64_column("close")?;
        let amounts = f64_column("amount")?;

        let indicator_arrays: Vec<Option<&Float64Array>> = INDICATOR_COLUMNS
            .iter()
            .map(|name| {
                batch
                    .column_by_name(name)
                    .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
            })
            .collect();

        let from_f64 = |f: f64| Decimal::from_f64(f).unwrap_or_default();

        for row in 0..batch.num_rows() {
            let symbol_text = symbols.value(row);
            if let Some(wanted) = wanted_symbol {
                if symbol_text != wanted {
                    continue;
                }
            }

            let timestamp = DateTime::from_timestamp_millis(timestamps.value(row))
                .ok_or_else(|| KfError::from(DataError::InvalidFormat {
                    message: format!("bad timestamp in row {row}"),
                }))?;

            let mut bar = Bar::new(
                Symbol::parse(symbol_text)?,
                timestamp,
                Frequency::parse(frequencies.value(row))?,
                from_f64(opens.value(row)),
                from_f64(highs.value(row)),
                from_f64(lows.value(row)),
                from_f64(closes.value(row)),
                volumes.value(row),
                from_f64(amounts.value(row)),
            );

            let mut indicators = Indicators::default();
            for (name, array) in INDICATOR_COLUMNS.iter().zip(&indicator_arrays) {
                if let Some(array) = array {
                    if !array.is_null(row) {
                        set_indicator_field(&mut indicators, name, from_f64(array.value(row)));
                    }
                }
            }
            if !indicators.is_empty() {
                bar.indicators = Some(indicators);
            }

            out.push(bar);
        }
        Ok(())
    }
}

fn indicator_field(indicators: &Indicators, name: &str) -> Option<Decimal> {
    match name {
        "ma5" => indicators.ma5,
        "ma10" => indicators.ma10,
        "ma20" => indicators.ma20,
        "ma60" => indicators.ma60,
        "macd_dif" => indicators.macd_dif,
        "macd_dea" => indicators.macd_dea,
        "macd_histogram" => indicators.macd_histogram,
        "rsi_14" => indicators.rsi_14,
        "boll_upper" => indicators.boll_upper,
        "boll_middle" => indicators.boll_middle,
        "boll_lower" => indicators.boll_lower,
        _ => None,
    }
}

fn set_indicator_field(indicators: &mut Indicators, name: &str, value: Decimal) {
    let slot = match name {
        "ma5" => &mut indicators.ma5,
        "ma10" => &mut indicators.ma10,
        "ma20" => &mut indicators.ma20,
        "ma60" => &mut indicators.ma60,
        "macd_dif" => &mut indicators.macd_dif,
        "macd_dea" => &mut indicators.macd_dea,
        "macd_histogram" => &mut indicators.macd_histogram,
        "rsi_14" => &mut indicators.rsi_14,
        "boll_upper" => &mut indicators.boll_upper,
        "boll_middle" => &mut indicators.boll_middle,
        "boll_lower" => &mut indicators.boll_lower,
        _ => return,
    };
    *slot = Some(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar_at(code: &str, ts: DateTime<Utc>, close: Decimal) -> Bar {
        Bar::new(
            Symbol::shenzhen(code),
            ts,
            Frequency::Day1,
            close,
            close + dec!(0.10),
            close - dec!(0.05),
            close,
            1_000_000,
            close * dec!(1_000_000),
        )
    }

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 7, 0, 0).unwrap()
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = BarArchive::new(dir.path());

        let bars = vec![
            bar_at("000001", ts(2024, 1, 2), dec!(10.00)),
            bar_at("000001", ts(2024, 1, 3), dec!(10.20)),
            bar_at("000002", ts(2024, 1, 2), dec!(5.00)),
        ];
        archive.write_bars(&bars).unwrap();

        let loaded = archive
            .read_bars(
                &Symbol::shenzhen("000001"),
                ts(2024, 1, 1),
                ts(2024, 12, 31),
                Frequency::Day1,
            )
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].timestamp, ts(2024, 1, 2));
        assert_eq!(loaded[1].close, dec!(10.20));
        assert_eq!(loaded[0].volume, 1_000_000);
    }

    #[test]
    fn test_partition_layout_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let archive = BarArchive::new(dir.path());
        archive
            .write_bars(&[bar_at("000001", ts(2023, 6, 1), dec!(9.00))])
            .unwrap();

        let expected = dir
            .path()
            .join("kline")
            .join("frequency=1d")
            .join("year=2023")
            .join("data.parquet");
        assert!(expected.exists());
    }

    #[test]
    fn test_read_spans_year_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let archive = BarArchive::new(dir.path());
        archive
            .write_bars(&[
                bar_at("000001", ts(2023, 12, 29), dec!(9.50)),
                bar_at("000001", ts(2024, 1, 2), dec!(10.00)),
            ])
            .unwrap();

        let loaded = archive
            .read_bars(
                &Symbol::shenzhen("000001"),
                ts(2023, 12, 1),
                ts(2024, 1, 31),
                Frequency::Day1,
            )
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].timestamp < loaded[1].timestamp);
    }

    #[test]
    fn test_latest_bar_scans_backward() {
        let dir = tempfile::tempdir().unwrap();
        let archive = BarArchive::new(dir.path());
        archive
            .write_bars(&[
                bar_at("000001", ts(2023, 12, 29), dec!(9.50)),
                bar_at("000001", ts(2024, 3, 1), dec!(11.00)),
            ])
            .unwrap();

        let latest = archive
            .latest_bar(&Symbol::shenzhen("000001"), Frequency::Day1)
            .unwrap()
            .unwrap();
        assert_eq!(latest.timestamp, ts(2024, 3, 1));

        let missing = archive
            .latest_bar(&Symbol::shenzhen("999999"), Frequency::Day1)
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_indicators_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = BarArchive::new(dir.path());

        let indicators = Indicators {
            ma5: Some(dec!(10.1)),
            rsi_14: Some(dec!(55.5)),
            ..Default::default()
        };
        let bar = bar_at("000001", ts(2024, 1, 2), dec!(10.00)).with_indicators(indicators);
        archive.write_bars(&[bar]).unwrap();

        let loaded = archive
            .read_bars(
                &Symbol::shenzhen("000001"),
                ts(2024, 1, 1),
                ts(2024, 1, 31),
                Frequency::Day1,
            )
            .unwrap();
        let loaded_indicators = loaded[0].indicators.as_ref().unwrap();
        assert_eq!(loaded_indicators.ma5, Some(dec!(10.1)));
        assert_eq!(loaded_indicators.rsi_14, Some(dec!(55.5)));
        assert_eq!(loaded_indicators.ma10, None);
    }

    #[test]
    fn test_invalid_bar_refused_by_writer() {
        let dir = tempfile::tempdir().unwrap();
        let archive = BarArchive::new(dir.path());
        let mut bad = bar_at("000001", ts(2024, 1, 2), dec!(10.00));
        bad.low = dec!(99.00);
        assert!(archive.write_bars(&[bad]).is_err());
    }

    #[test]
    fn test_symbols_listing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = BarArchive::new(dir.path());
        archive
            .write_bars(&[
                bar_at("000001", ts(2024, 1, 2), dec!(10.00)),
                bar_at("000002", ts(2024, 1, 2), dec!(5.00)),
            ])
            .unwrap();

        let symbols = archive.symbols(Frequency::Day1).unwrap();
        assert_eq!(symbols.len(), 2);
    }

    #[test]
    fn test_inverted_range_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = BarArchive::new(dir.path());
        assert!(archive
            .read_bars(
                &Symbol::shenzhen("000001"),
                ts(2024, 2, 1),
                ts(2024, 1, 1),
                Frequency::Day1,
            )
            .is_err());
    }
}
