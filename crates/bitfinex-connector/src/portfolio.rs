/*
[INPUT]:  Currency holdings and USD tickers
[OUTPUT]: Portfolio totals in USD or any rated currency
[POS]:    Valuation layer - pure arithmetic over ticker mid prices
[UPDATE]: When changing the quote currency or rate sources
*/

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;

use crate::http::{BitfinexError, Result};
use crate::types::{Pair, Ticker};

/// Currency every rate is quoted against
pub const QUOTE_CURRENCY: &str = "USD";

/// `t{CUR}USD`, or `t{CUR}:USD` for symbols longer than three letters
pub fn usd_pair(currency: &str) -> Result<Pair> {
    if currency.len() > 3 {
        Pair::from_symbol(&format!("{currency}:{QUOTE_CURRENCY}"))
    } else {
        Pair::from_symbol(&format!("{currency}{QUOTE_CURRENCY}"))
    }
}

/// Base currency of a USD-quoted pair, `None` for other quotes
pub fn usd_base(pair: &Pair) -> Option<&str> {
    let symbol = pair.symbol();
    match symbol.split_once(':') {
        Some((base, quote)) => (quote == QUOTE_CURRENCY && !base.is_empty()).then_some(base),
        None => symbol
            .strip_suffix(QUOTE_CURRENCY)
            .filter(|base| !base.is_empty()),
    }
}

/// USD value of one unit of each currency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateTable {
    rates: HashMap<String, Decimal>,
}

impl Default for RateTable {
    fn default() -> Self {
        let mut rates = HashMap::new();
        rates.insert(QUOTE_CURRENCY.to_string(), Decimal::ONE);
        Self { rates }
    }
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, currency: impl Into<String>, usd_rate: Decimal) {
        self.rates.insert(currency.into(), usd_rate);
    }

    /// Record the ticker's mid price as the base currency's USD rate
    pub fn insert_ticker(&mut self, ticker: &Ticker) -> Result<()> {
        let base = usd_base(&ticker.pair).ok_or_else(|| {
            BitfinexError::Config(format!("{} is not quoted in {QUOTE_CURRENCY}", ticker.pair))
        })?;
        self.insert(base, ticker.mid_price());
        Ok(())
    }

    pub fn from_tickers<'a>(tickers: impl IntoIterator<Item = &'a Ticker>) -> Result<Self> {
        let mut table = Self::new();
        for ticker in tickers {
            table.insert_ticker(ticker)?;
        }
        Ok(table)
    }

    pub fn usd_rate(&self, currency: &str) -> Result<Decimal> {
        self.rates
            .get(currency)
            .copied()
            .ok_or_else(|| BitfinexError::MissingRate {
                currency: currency.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Holdings per currency
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Portfolio {
    holdings: BTreeMap<String, Decimal>,
}

impl Portfolio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holding(mut self, currency: impl Into<String>, amount: Decimal) -> Self {
        self.set(currency, amount);
        self
    }

    pub fn set(&mut self, currency: impl Into<String>, amount: Decimal) {
        self.holdings.insert(currency.into(), amount);
    }

    pub fn holding(&self, currency: &str) -> Decimal {
        self.holdings.get(currency).copied().unwrap_or_default()
    }

    pub fn currencies(&self) -> impl Iterator<Item = &str> {
        self.holdings.keys().map(String::as_str)
    }

    pub fn total_usd(&self, rates: &RateTable) -> Result<Decimal> {
        self.holdings
            .iter()
            .try_fold(Decimal::ZERO, |total, (currency, amount)| {
                Ok(total + *amount * rates.usd_rate(currency)?)
            })
    }

    /// Total value expressed in `currency`
    pub fn total_in(&self, currency: &str, rates: &RateTable) -> Result<Decimal> {
        let total = self.total_usd(rates)?;
        if currency == QUOTE_CURRENCY {
            return Ok(total);
        }
        let rate = rates.usd_rate(currency)?;
        total
            .checked_div(rate)
            .ok_or_else(|| BitfinexError::MissingRate {
                currency: currency.to_string(),
            })
    }
}
