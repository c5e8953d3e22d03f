//! CSV rendering of a gap-filled chain, and the missing-chain notice file.
//!
//! Grounded on `PersisterCSV`/`CSVFromOptionChain`/`DataGrid`: two column
//! layouts (side-by-side, one row per strike with call and put columns
//! adjacent; stacked, one row per instrument tagged by side), double cells
//! formatted `.2f` (`.4f` for the precision column) with the underlying
//! `NaN` convention for an absent price rendering as the literal `nan`
//! rather than a placeholder, and timestamp cells rendering the `{null}`
//! placeholder instead — the two absent-value conventions the source's
//! `DataGrid` applies to `DOUBLE` vs. `TIMESTAMP` cells respectively, since
//! a double already has `NaN` as its natural absent value but a timestamp
//! does not.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::chain::config::{Config, CsvLayout};
use crate::chain::error::ChainError;
use crate::chain::market_environment::{ExchangeClose, MarketEnvironment};
use crate::chain::model::OptionChain;
use crate::chain::snapshot::record::Record;
use crate::chain::symbology::osi::StrikeKey;
use crate::chain::types::Timestamp;

/// Pluggable factory for the byte stream a CSV or missing-notice file is
/// written to, mirroring the original's `Outputter` function-pointer field
/// — swappable so tests can capture output in memory instead of touching
/// the filesystem.
pub trait Outputter: Send + Sync {
    fn open(&self, path: &str) -> Result<Box<dyn Write>, ChainError>;
}

/// Default outputter: creates the path's parent directories and opens a
/// plain file for writing, truncating any existing content.
pub struct FileOutputter;

impl Outputter for FileOutputter {
    fn open(&self, path: &str) -> Result<Box<dyn Write>, ChainError> {
        let path = Path::new(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ChainError::Internal(format!("creating directories for {}: {e}", path.display())))?;
        }
        let file = fs::File::create(path).map_err(|e| ChainError::Internal(format!("opening {}: {e}", path.display())))?;
        Ok(Box::new(file))
    }
}

fn csv_err(e: csv::Error) -> ChainError {
    ChainError::Internal(format!("writing CSV record: {e}"))
}

/// A double cell: present values format `.2f`; `NaN` (the convention for an
/// absent `PriceWeight`) formats as the literal `nan`, matching fmtlib's
/// behavior of ignoring the precision specifier for non-finite values.
fn fmt_double(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{value:.2}")
    }
}

/// The precision column's `.4f` variant of [`fmt_double`].
fn fmt_precision(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{value:.4}")
    }
}

fn fmt_local_date(ts: Timestamp, tz: Tz) -> String {
    ts.to_utc_datetime().with_timezone(&tz).format("%Y-%m-%d").to_string()
}

fn fmt_local_time(ts: Timestamp, tz: Tz) -> String {
    ts.to_utc_datetime().with_timezone(&tz).format("%H:%M:%S").to_string()
}

fn fmt_local_datetime(ts: Timestamp, tz: Tz) -> String {
    ts.to_utc_datetime().with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `RecvTime` is only meaningful once a record has at least one valid
/// quote side; an otherwise-untouched record renders the `{null}` cell.
fn recv_time_cell(record: &Record, tz: Tz) -> String {
    if record.any_bid_ask_valid() {
        fmt_local_datetime(record.recv_time, tz)
    } else {
        "{null}".to_string()
    }
}

/// `LastTradeTime` is only meaningful when a trade print was actually
/// observed; an absent trade renders `{null}` rather than a timestamp with
/// no backing observation.
fn trade_time_cell(record: &Record, tz: Tz) -> String {
    if record.trade.is_present() {
        fmt_local_datetime(record.trade_time, tz)
    } else {
        "{null}".to_string()
    }
}

/// Midpoint computed directly from both sides rather than
/// [`Record::mid`], which requires both to be valid: here `NaN` is allowed
/// to propagate through the arithmetic so a one-sided record's mid cell
/// renders `nan` the same way its missing side does.
fn mid_price(record: &Record) -> f64 {
    (record.ask.price + record.bid.price) / 2.0
}

/// Writes a gap-filled [`OptionChain`] as CSV and, separately, a
/// missing-chain notice text file, to paths derived from the chain's
/// underlier/date/expiry.
pub struct CsvSink {
    basepath: String,
    outdatedirs: bool,
    layout: CsvLayout,
    chain_outputter: Arc<dyn Outputter>,
    missing_outputter: Arc<dyn Outputter>,
}

impl CsvSink {
    pub fn new(config: &Config) -> Self {
        let layout = if config.csvstacked { CsvLayout::Stacked } else { CsvLayout::SideBySide };
        Self {
            basepath: config.basepath.clone(),
            outdatedirs: config.outdatedirs,
            layout,
            chain_outputter: Arc::new(FileOutputter),
            missing_outputter: Arc::new(FileOutputter),
        }
    }

    /// Overrides both output-stream factories, e.g. to capture output in
    /// memory for a test instead of writing to the filesystem.
    pub fn with_outputters(mut self, chain_outputter: Arc<dyn Outputter>, missing_outputter: Arc<dyn Outputter>) -> Self {
        self.chain_outputter = chain_outputter;
        self.missing_outputter = missing_outputter;
        self
    }

    fn filename_part(&self, date: &str, symbol: &str) -> String {
        let mut path = self.basepath.clone();
        if self.outdatedirs {
            path.push('/');
            path.push_str(date);
        }
        path.push('/');
        path.push_str(&symbol.to_lowercase());
        path
    }

    fn chain_path(&self, chain: &OptionChain) -> String {
        let date = chain.valuation_date.format("%Y-%m-%d").to_string();
        let mut path = self.filename_part(&date, &chain.underlier);
        path.push_str(&format!(
            "_chain_{}_{}_n{}.csv",
            date,
            chain.expiry_date.format("%Y-%m-%d"),
            chain.puts.len()
        ));
        path
    }

    /// Renders `chain` in the configured column layout. The parity rate and
    /// precision columns are computed here once, against `environment`, and
    /// shared across every row.
    pub fn persist(&self, chain: &OptionChain, environment: &dyn MarketEnvironment) -> Result<(), ChainError> {
        let exchange_close = environment.exchange_close();
        let rate = environment.rate(chain.valuation_date, chain.expiry_date)?;
        let pcp_rate = chain.parity_rate(rate, exchange_close)?;
        let precision = match chain.parity_rate_quality(rate, exchange_close) {
            Ok(variance) => variance.sqrt(),
            Err(e) => {
                tracing::warn!(
                    underlier = %chain.underlier,
                    valuation_date = %chain.valuation_date,
                    expiry_date = %chain.expiry_date,
                    error = %e,
                    "failed to compute precision column"
                );
                f64::NAN
            }
        };

        let path = self.chain_path(chain);
        let writer = self.chain_outputter.open(&path)?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        match self.layout {
            CsvLayout::SideBySide => write_side_by_side(&mut csv_writer, chain, exchange_close, pcp_rate, precision)?,
            CsvLayout::Stacked => write_stacked(&mut csv_writer, chain, exchange_close, pcp_rate, precision)?,
        }
        csv_writer
            .flush()
            .map_err(|e| ChainError::Internal(format!("flushing CSV for {path}: {e}")))
    }

    /// No-op if `missing` is empty. Otherwise writes one line per entry,
    /// named after the first entry's timestamp.
    pub fn persist_missing(&self, symbol: &str, date: NaiveDate, missing: &[(Timestamp, NaiveDate)]) -> Result<(), ChainError> {
        if missing.is_empty() {
            return Ok(());
        }
        let date_str = date.format("%Y-%m-%d").to_string();
        let first_time = missing[0].0.to_utc_datetime().format("%H-%M-%S%.9f").to_string();
        let mut path = self.filename_part(&date_str, symbol);
        path.push_str(&format!("_missing_{date_str}_{first_time}.txt"));

        let mut writer = self.missing_outputter.open(&path)?;
        for (timestamp, expiry_date) in missing {
            let line = format!(
                "{} EXP {}\n",
                timestamp.to_utc_datetime().format("%Y-%m-%d %H:%M:%S%.9f"),
                expiry_date.format("%Y-%m-%d"),
            );
            writer
                .write_all(line.as_bytes())
                .map_err(|e| ChainError::Internal(format!("writing {path}: {e}")))?;
        }
        Ok(())
    }
}

fn write_side_by_side<W: Write>(
    writer: &mut csv::Writer<W>,
    chain: &OptionChain,
    exchange_close: ExchangeClose,
    pcp_rate: f64,
    precision: f64,
) -> Result<(), ChainError> {
    writer
        .write_record([
            "symbol",
            "date",
            "time",
            "rate",
            "strike",
            "C_bid",
            "C_mid",
            "C_ask",
            "P_bid",
            "P_mid",
            "P_ask",
            "ExpDate",
            "C_BidSize",
            "C_AskSize",
            "C_RecvTime",
            "C_LastTrade",
            "C_LastTradeTime",
            "C_LastTradeSize",
            "C_Comment",
            "P_BidSize",
            "P_AskSize",
            "P_RecvTime",
            "P_LastTrade",
            "P_LastTradeTime",
            "P_LastTradeSize",
            "P_Comment",
            "Precision",
        ])
        .map_err(csv_err)?;

    let tz = exchange_close.timezone;
    let chain_time = chain.chain_time();
    let expiry_time = chain.expiry_time(exchange_close)?;
    let symbol = chain.underlier.clone();
    let date = fmt_local_date(chain_time, tz);
    let time = fmt_local_time(chain_time, tz);
    let rate = fmt_double(pcp_rate);
    let exp_date = fmt_local_date(expiry_time, tz);
    let precision_cell = fmt_precision(precision);

    // Iterates puts, matching each to the call at the same strike, and
    // skips any strike not present on both sides.
    for (&strike, put) in &chain.puts {
        let Some(call) = chain.calls.get(&strike) else {
            continue;
        };

        let strike_str = strike.to_display_string();
        let c_bid = fmt_double(call.bid.price);
        let c_mid = fmt_double(mid_price(call));
        let c_ask = fmt_double(call.ask.price);
        let p_bid = fmt_double(put.bid.price);
        let p_mid = fmt_double(mid_price(put));
        let p_ask = fmt_double(put.ask.price);
        let c_bid_size = call.bid.weight.to_string();
        let c_ask_size = call.ask.weight.to_string();
        let c_recv_time = recv_time_cell(call, tz);
        let c_last_trade = fmt_double(call.trade.price);
        let c_last_trade_time = trade_time_cell(call, tz);
        let c_last_trade_size = call.trade.weight.to_string();
        let p_bid_size = put.bid.weight.to_string();
        let p_ask_size = put.ask.weight.to_string();
        let p_recv_time = recv_time_cell(put, tz);
        let p_last_trade = fmt_double(put.trade.price);
        let p_last_trade_time = trade_time_cell(put, tz);
        let p_last_trade_size = put.trade.weight.to_string();

        writer
            .write_record([
                symbol.as_str(),
                date.as_str(),
                time.as_str(),
                rate.as_str(),
                strike_str.as_str(),
                c_bid.as_str(),
                c_mid.as_str(),
                c_ask.as_str(),
                p_bid.as_str(),
                p_mid.as_str(),
                p_ask.as_str(),
                exp_date.as_str(),
                c_bid_size.as_str(),
                c_ask_size.as_str(),
                c_recv_time.as_str(),
                c_last_trade.as_str(),
                c_last_trade_time.as_str(),
                c_last_trade_size.as_str(),
                call.comment.as_str(),
                p_bid_size.as_str(),
                p_ask_size.as_str(),
                p_recv_time.as_str(),
                p_last_trade.as_str(),
                p_last_trade_time.as_str(),
                p_last_trade_size.as_str(),
                put.comment.as_str(),
                precision_cell.as_str(),
            ])
            .map_err(csv_err)?;
    }
    Ok(())
}

fn write_stacked<W: Write>(
    writer: &mut csv::Writer<W>,
    chain: &OptionChain,
    exchange_close: ExchangeClose,
    pcp_rate: f64,
    precision: f64,
) -> Result<(), ChainError> {
    writer
        .write_record([
            "symbol",
            "date",
            "time",
            "rate",
            "type",
            "strike",
            "bid",
            "mid",
            "ask",
            "ExpDate",
            "BidSize",
            "AskSize",
            "RecvTime",
            "LastTrade",
            "LastTradeTime",
            "LastTradeSize",
            "Comment",
            "Precision",
        ])
        .map_err(csv_err)?;

    let tz = exchange_close.timezone;
    let chain_time = chain.chain_time();
    let expiry_time = chain.expiry_time(exchange_close)?;
    let symbol = chain.underlier.clone();
    let date = fmt_local_date(chain_time, tz);
    let time = fmt_local_time(chain_time, tz);
    let rate = fmt_double(pcp_rate);
    let exp_date = fmt_local_date(expiry_time, tz);
    let precision_cell = fmt_precision(precision);

    let sides: [(&str, &std::collections::BTreeMap<StrikeKey, Record>); 2] = [("Put", &chain.puts), ("Call", &chain.calls)];

    for (label, records) in sides {
        for (&strike, record) in records {
            let strike_str = strike.to_display_string();
            let bid = fmt_double(record.bid.price);
            let mid = fmt_double(mid_price(record));
            let ask = fmt_double(record.ask.price);
            let bid_size = record.bid.weight.to_string();
            let ask_size = record.ask.weight.to_string();
            let recv_time = recv_time_cell(record, tz);
            let last_trade = fmt_double(record.trade.price);
            let last_trade_time = trade_time_cell(record, tz);
            let last_trade_size = record.trade.weight.to_string();

            writer
                .write_record([
                    symbol.as_str(),
                    date.as_str(),
                    time.as_str(),
                    rate.as_str(),
                    label,
                    strike_str.as_str(),
                    bid.as_str(),
                    mid.as_str(),
                    ask.as_str(),
                    exp_date.as_str(),
                    bid_size.as_str(),
                    ask_size.as_str(),
                    recv_time.as_str(),
                    last_trade.as_str(),
                    last_trade_time.as_str(),
                    last_trade_size.as_str(),
                    record.comment.as_str(),
                    precision_cell.as_str(),
                ])
                .map_err(csv_err)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::snapshot::record::PriceWeight;
    use crate::chain::symbology::model::InstrumentTable;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    struct MemoryOutputter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    struct MemoryWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for MemoryWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Outputter for MemoryOutputter {
        fn open(&self, _path: &str) -> Result<Box<dyn Write>, ChainError> {
            Ok(Box::new(MemoryWriter {
                buffer: Arc::clone(&self.buffer),
            }))
        }
    }

    fn close() -> ExchangeClose {
        ExchangeClose {
            hour: 16,
            minute: 0,
            timezone: chrono_tz::America::New_York,
        }
    }

    fn strike_375_chain() -> OptionChain {
        let expiry = NaiveDate::from_ymd_opt(2025, 4, 4).unwrap();
        let valuation = NaiveDate::from_ymd_opt(2025, 4, 2).unwrap();
        let table = InstrumentTable {
            underlier: "SPY".to_string(),
            expiry_date: expiry,
            puts: HashMap::new(),
            calls: HashMap::new(),
        };
        let mut puts = BTreeMap::new();
        let mut calls = BTreeMap::new();
        let strike = StrikeKey::from_price(375.0);

        // 2025-04-02 17:30:09 UTC = 13:30:09 America/New_York (EDT).
        let recv_time = Timestamp::from_utc_datetime(
            chrono::DateTime::parse_from_rfc3339("2025-04-02T17:30:09Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        );

        calls.insert(
            strike,
            Record {
                trade: PriceWeight::new(186.62, 1),
                trade_time: Timestamp::from_utc_datetime(
                    chrono::DateTime::parse_from_rfc3339("2025-04-02T15:01:46Z").unwrap().with_timezone(&chrono::Utc),
                ),
                bid: PriceWeight::new(190.99, 72),
                ask: PriceWeight::new(191.21, 64),
                recv_time,
                comment: String::new(),
            },
        );
        puts.insert(
            strike,
            Record {
                trade: PriceWeight::absent(),
                trade_time: recv_time,
                bid: PriceWeight::new(0.00, 1),
                ask: PriceWeight::new(0.01, 1686),
                recv_time,
                comment: "spread-fit".to_string(),
            },
        );

        OptionChain::build(puts, calls, &table, valuation)
    }

    struct FlatEnv {
        rate: f64,
        close: ExchangeClose,
    }

    impl MarketEnvironment for FlatEnv {
        fn rate(&self, _v: NaiveDate, _e: NaiveDate) -> Result<f64, ChainError> {
            Ok(self.rate)
        }
        fn exchange_close(&self) -> ExchangeClose {
            self.close
        }
    }

    #[test]
    fn absent_trade_renders_nan_price_and_null_timestamp() {
        let chain = strike_375_chain();
        let put = &chain.puts[&StrikeKey::from_price(375.0)];
        assert_eq!(fmt_double(put.trade.price), "nan");
        assert_eq!(trade_time_cell(put, close().timezone), "{null}");
    }

    #[test]
    fn recv_time_present_when_any_side_valid() {
        let chain = strike_375_chain();
        let put = &chain.puts[&StrikeKey::from_price(375.0)];
        assert_ne!(recv_time_cell(put, close().timezone), "{null}");
    }

    #[test]
    fn side_by_side_skips_strikes_missing_on_either_side() {
        let chain = strike_375_chain();
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = CsvSink::new(&Config {
            basepath: "/tmp/straddle-test".to_string(),
            ..Config::default()
        })
        .with_outputters(
            Arc::new(MemoryOutputter { buffer: Arc::clone(&buffer) }),
            Arc::new(MemoryOutputter { buffer: Arc::clone(&buffer) }),
        );
        let env = FlatEnv { rate: 0.05, close: close() };
        sink.persist(&chain, &env).unwrap();

        let contents = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let mut lines = contents.lines();
        assert!(lines.next().unwrap().starts_with("symbol,date,time,rate,strike"));
        let row = lines.next().unwrap();
        assert!(row.contains("nan"));
        assert!(row.contains("{null}"));
        assert!(row.ends_with("spread-fit"));
    }

    #[test]
    fn persist_missing_is_noop_for_empty_list() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = CsvSink::new(&Config::default()).with_outputters(
            Arc::new(MemoryOutputter { buffer: Arc::clone(&buffer) }),
            Arc::new(MemoryOutputter { buffer: Arc::clone(&buffer) }),
        );
        sink.persist_missing("SPY", NaiveDate::from_ymd_opt(2025, 4, 2).unwrap(), &[]).unwrap();
        assert!(buffer.lock().unwrap().is_empty());
    }

    #[test]
    fn persist_missing_writes_one_line_per_entry() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = CsvSink::new(&Config::default()).with_outputters(
            Arc::new(MemoryOutputter { buffer: Arc::clone(&buffer) }),
            Arc::new(MemoryOutputter { buffer: Arc::clone(&buffer) }),
        );
        let missing = vec![
            (Timestamp::from_nanos(1_000_000_000), NaiveDate::from_ymd_opt(2025, 4, 4).unwrap()),
            (Timestamp::from_nanos(2_000_000_000), NaiveDate::from_ymd_opt(2025, 4, 11).unwrap()),
        ];
        sink.persist_missing("SPY", NaiveDate::from_ymd_opt(2025, 4, 2).unwrap(), &missing).unwrap();
        let contents = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("EXP 2025-04-04"));
        assert!(contents.contains("EXP 2025-04-11"));
    }
}
