//! Relational catalogs consumed read-only by the core: stock info, the
//! trading calendar, and the tradable universe.  Each loads from a small CSV
//! table into memory.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use kf_types::{DataError, KfResult, Symbol};

/// One listed instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockInfo {
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub market_cap: Option<Decimal>,
    #[serde(default)]
    pub circulating_cap: Option<Decimal>,
    pub list_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct CalendarRow {
    date: NaiveDate,
    is_trading: u8,
}

/// In-memory view of the stock-info and trading-calendar tables.
#[derive(Debug, Default)]
pub struct Catalog {
    stocks: HashMap<Symbol, StockInfo>,
    trading_days: BTreeSet<NaiveDate>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the stock-info table (`symbol,name,industry,market_cap,
    /// circulating_cap,list_date`).
    pub fn load_stock_info<P: AsRef<Path>>(&mut self, path: P) -> KfResult<usize> {
        let mut reader = csv::Reader::from_path(path.as_ref()).map_err(csv_error)?;
        let mut count = 0;
        for row in reader.deserialize::<StockInfo>() {
            let info = row.map_err(csv_error)?;
            let symbol = Symbol::parse(&info.symbol)?;
            self.stocks.insert(symbol, info);
            count += 1;
        }
        Ok(count)
    }

    /// Load the trading calendar (`date,is_trading`); only trading days are
    /// retained.
    pub fn load_calendar<P: AsRef<Path>>(&mut self, path: P) -> KfResult<usize> {
        let mut reader = csv::Reader::from_path(path.as_ref()).map_err(csv_error)?;
        let mut count = 0;
        for row in reader.deserialize::<CalendarRow>() {
            let row = row.map_err(csv_error)?;
            if row.is_trading != 0 {
                self.trading_days.insert(row.date);
            }
            count += 1;
        }
        Ok(count)
    }

    /// Register trading days directly (backtests without a calendar file).
    pub fn add_trading_days(&mut self, days: impl IntoIterator<Item = NaiveDate>) {
        self.trading_days.extend(days);
    }

    /// Register instruments directly.
    pub fn add_stock(&mut self, info: StockInfo) -> KfResult<()> {
        let symbol = Symbol::parse(&info.symbol)?;
        self.stocks.insert(symbol, info);
        Ok(())
    }

    pub fn stock(&self, symbol: &Symbol) -> Option<&StockInfo> {
        self.stocks.get(symbol)
    }

    /// A date is a trading day iff the calendar says so.  With no calendar
    /// loaded, every weekday counts (permissive default for tests and
    /// ad-hoc runs).
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        if self.trading_days.is_empty() {
            use chrono::Datelike;
            return date.weekday().number_from_monday() <= 5;
        }
        self.trading_days.contains(&date)
    }

    /// Trading days within `[start, end]`, ascending.
    pub fn trading_calendar(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        self.trading_days
            .range(start..=end)
            .copied()
            .collect()
    }

    /// The universe as of a date: instruments already listed by then.
    pub fn universe(&self, as_of: NaiveDate) -> HashSet<Symbol> {
        self.stocks
            .iter()
            .filter(|(_, info)| info.list_date <= as_of)
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }
}

fn csv_error(e: csv::Error) -> kf_types::KfError {
    DataError::InvalidFormat {
        message: e.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_stock_info_csv() {
        let file = write_temp(
            "symbol,name,industry,market_cap,circulating_cap,list_date\n\
             000001.SZ,Ping An Bank,Banking,250000000000,200000000000,1991-04-03\n\
             600519.SH,Kweichow Moutai,Beverages,2100000000000,2100000000000,2001-08-27\n",
        );

        let mut catalog = Catalog::new();
        assert_eq!(catalog.load_stock_info(file.path()).unwrap(), 2);

        let info = catalog.stock(&Symbol::shenzhen("000001")).unwrap();
        assert_eq!(info.name, "Ping An Bank");
        assert_eq!(info.list_date, date(1991, 4, 3));
    }

    #[test]
    fn test_load_calendar_and_query() {
        let file = write_temp(
            "date,is_trading\n\
             2024-01-01,0\n\
             2024-01-02,1\n\
             2024-01-03,1\n\
             2024-01-06,0\n",
        );

        let mut catalog = Catalog::new();
        catalog.load_calendar(file.path()).unwrap();

        assert!(!catalog.is_trading_day(date(2024, 1, 1)));
        assert!(catalog.is_trading_day(date(2024, 1, 2)));
        assert_eq!(
            catalog.trading_calendar(date(2024, 1, 1), date(2024, 1, 31)),
            vec![date(2024, 1, 2), date(2024, 1, 3)]
        );
    }

    #[test]
    fn test_weekday_fallback_without_calendar() {
        let catalog = Catalog::new();
        assert!(catalog.is_trading_day(date(2024, 1, 2))); // Tuesday
        assert!(!catalog.is_trading_day(date(2024, 1, 6))); // Saturday
    }

    #[test]
    fn test_universe_respects_list_date() {
        let mut catalog = Catalog::new();
        catalog
            .add_stock(StockInfo {
                symbol: "000001.SZ".into(),
                name: "Ping An Bank".into(),
                industry: "Banking".into(),
                market_cap: None,
                circulating_cap: None,
                list_date: date(1991, 4, 3),
            })
            .unwrap();
        catalog
            .add_stock(StockInfo {
                symbol: "301999.SZ".into(),
                name: "Recent Listing".into(),
                industry: "Tech".into(),
                market_cap: None,
                circulating_cap: None,
                list_date: date(2024, 6, 1),
            })
            .unwrap();

        let universe = catalog.universe(date(2024, 1, 1));
        assert_eq!(universe.len(), 1);
        assert!(universe.contains(&Symbol::shenzhen("000001")));

        let later = catalog.universe(date(2024, 12, 31));
        assert_eq!(later.len(), 2);
    }
}
