//! File-backed instrument master and the straddle/strangle leg resolver.
//!
//! The master is a JSON document with the underlyings' spot instruments and
//! every listed index option:
//!
//! ```json
//! {
//!   "underlyings": [
//!     { "symbol": "NIFTY", "exchange": "NSE", "trading_symbol": "Nifty 50", "instrument_token": "99926000" }
//!   ],
//!   "options": [
//!     { "tradingsymbol": "NIFTY27OCT2625000CE", "instrument_token": "43210", "exchange": "NFO",
//!       "underlying": "NIFTY", "expiry": "2026-10-27", "strike": 25000, "instrument_type": "CE" }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use algo_options_core::{
    CollaboratorError, InstrumentRepository, Leg, OptionType, Side, StrategyResolver,
};
use algo_options_manager::QuoteCache;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
pub struct UnderlyingRecord {
    pub symbol: String,
    pub exchange: String,
    pub trading_symbol: String,
    pub instrument_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionRecord {
    pub tradingsymbol: String,
    pub instrument_token: String,
    pub exchange: String,
    pub underlying: String,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub instrument_type: OptionType,
}

#[derive(Debug, Default, Deserialize)]
struct MasterFile {
    #[serde(default)]
    underlyings: Vec<UnderlyingRecord>,
    #[serde(default)]
    options: Vec<OptionRecord>,
}

/// Call and put listed at one strike.
#[derive(Debug, Clone, Default)]
struct StrikePair {
    call: Option<OptionRecord>,
    put: Option<OptionRecord>,
}

#[derive(Debug, Default)]
pub struct InstrumentMaster {
    tokens: HashMap<(String, String), String>,
    underlyings: HashMap<String, UnderlyingRecord>,
    chains: HashMap<(String, NaiveDate), BTreeMap<Decimal, StrikePair>>,
}

impl InstrumentMaster {
    /// Loads the master from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading instrument master {}", path.display()))?;
        let master = Self::from_json(&raw)
            .with_context(|| format!("parsing instrument master {}", path.display()))?;
        info!(
            path = %path.display(),
            instruments = master.tokens.len(),
            chains = master.chains.len(),
            "instrument master loaded"
        );
        Ok(master)
    }

    /// # Errors
    /// Returns an error for malformed JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: MasterFile = serde_json::from_str(raw)?;
        let mut master = Self::default();

        for u in file.underlyings {
            master.tokens.insert(
                (u.exchange.clone(), u.trading_symbol.clone()),
                u.instrument_token.clone(),
            );
            master.underlyings.insert(u.symbol.to_uppercase(), u);
        }
        for o in file.options {
            master.tokens.insert(
                (o.exchange.clone(), o.tradingsymbol.clone()),
                o.instrument_token.clone(),
            );
            let pair = master
                .chains
                .entry((o.underlying.to_uppercase(), o.expiry))
                .or_default()
                .entry(o.strike)
                .or_default();
            match o.instrument_type {
                OptionType::Call => pair.call = Some(o),
                OptionType::Put => pair.put = Some(o),
            }
        }
        Ok(master)
    }

    #[must_use]
    pub fn underlying(&self, symbol: &str) -> Option<&UnderlyingRecord> {
        self.underlyings.get(&symbol.to_uppercase())
    }

    /// Strikes with both a call and a put listed, ascending.
    fn paired_strikes(&self, symbol: &str, expiry: NaiveDate) -> Vec<(Decimal, &StrikePair)> {
        self.chains
            .get(&(symbol.to_uppercase(), expiry))
            .map(|chain| {
                chain
                    .iter()
                    .filter(|(_, p)| p.call.is_some() && p.put.is_some())
                    .map(|(k, p)| (*k, p))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl InstrumentRepository for InstrumentMaster {
    async fn resolve_token(
        &self,
        exchange: &str,
        trading_symbol: &str,
    ) -> Result<String, CollaboratorError> {
        self.tokens
            .get(&(exchange.to_string(), trading_symbol.to_string()))
            .cloned()
            .ok_or_else(|| CollaboratorError::InstrumentNotFound {
                exchange: exchange.to_string(),
                trading_symbol: trading_symbol.to_string(),
            })
    }
}

/// Supported strategy shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    ShortStraddle,
    LongStraddle,
    ShortStrangle,
}

impl StrategyKind {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "short_straddle" => Some(Self::ShortStraddle),
            "long_straddle" => Some(Self::LongStraddle),
            "short_strangle" => Some(Self::ShortStrangle),
            _ => None,
        }
    }
}

/// Index of the strike closest to `spot`; ties go to the lower strike.
fn atm_index(strikes: &[Decimal], spot: Decimal) -> Option<usize> {
    strikes
        .iter()
        .enumerate()
        .min_by_key(|(_, k)| (**k - spot).abs())
        .map(|(i, _)| i)
}

/// Resolves strategy legs around the at-the-money strike of the underlying.
pub struct ChainResolver {
    master: Arc<InstrumentMaster>,
    quotes: Arc<QuoteCache>,
    quote_client_id: String,
    strangle_offset: usize,
}

impl std::fmt::Debug for ChainResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainResolver")
            .field("quote_client_id", &self.quote_client_id)
            .field("strangle_offset", &self.strangle_offset)
            .finish_non_exhaustive()
    }
}

impl ChainResolver {
    #[must_use]
    pub fn new(
        master: Arc<InstrumentMaster>,
        quotes: Arc<QuoteCache>,
        quote_client_id: String,
        strangle_offset: u32,
    ) -> Self {
        Self {
            master,
            quotes,
            quote_client_id,
            strangle_offset: strangle_offset as usize,
        }
    }

    async fn spot(&self, symbol: &str) -> Result<Decimal, CollaboratorError> {
        let u = self
            .master
            .underlying(symbol)
            .ok_or_else(|| CollaboratorError::InstrumentNotFound {
                exchange: "spot".to_string(),
                trading_symbol: symbol.to_string(),
            })?;
        self.quotes
            .get_quote(
                &self.quote_client_id,
                &u.exchange,
                &u.trading_symbol,
                &u.instrument_token,
            )
            .await
            .map(|q| q.price)
            .map_err(|e| CollaboratorError::Unavailable(format!("spot quote for {symbol}: {e}")))
    }
}

#[async_trait]
impl StrategyResolver for ChainResolver {
    async fn resolve_legs(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        strategy: &str,
        lot_size: u32,
    ) -> Result<Vec<Leg>, CollaboratorError> {
        let kind = StrategyKind::parse(strategy)
            .ok_or_else(|| CollaboratorError::UnknownStrategy(strategy.to_string()))?;
        let spot = self.spot(symbol).await?;
        let legs = select_legs(
            &self.master,
            symbol,
            expiry,
            kind,
            spot,
            self.strangle_offset,
            lot_size,
        )?;
        debug!(symbol, %spot, strategy, legs = legs.len(), "legs resolved");
        Ok(legs)
    }
}

/// Picks the legs of `kind` from the chain given the spot price.
///
/// # Errors
/// `NoStrikesAvailable` when the chain is empty or too short for the offset.
pub fn select_legs(
    master: &InstrumentMaster,
    symbol: &str,
    expiry: NaiveDate,
    kind: StrategyKind,
    spot: Decimal,
    strangle_offset: usize,
    lot_size: u32,
) -> Result<Vec<Leg>, CollaboratorError> {
    let no_strikes = || CollaboratorError::NoStrikesAvailable {
        symbol: symbol.to_string(),
        expiry: expiry.to_string(),
    };

    let chain = master.paired_strikes(symbol, expiry);
    let strikes: Vec<Decimal> = chain.iter().map(|(k, _)| *k).collect();
    let atm = atm_index(&strikes, spot).ok_or_else(no_strikes)?;

    let (call_at, put_at, side) = match kind {
        StrategyKind::ShortStraddle => (atm, atm, Side::Sell),
        StrategyKind::LongStraddle => (atm, atm, Side::Buy),
        StrategyKind::ShortStrangle => (
            atm.checked_add(strangle_offset).filter(|i| *i < strikes.len()).ok_or_else(no_strikes)?,
            atm.checked_sub(strangle_offset).ok_or_else(no_strikes)?,
            Side::Sell,
        ),
    };

    let leg = |record: Option<&OptionRecord>| {
        record.ok_or_else(no_strikes).map(|o| Leg {
            side,
            option_type: o.instrument_type,
            exchange: o.exchange.clone(),
            trading_symbol: o.tradingsymbol.clone(),
            strike: o.strike,
            instrument_token: o.instrument_token.clone(),
            quantity: lot_size,
            expiry: o.expiry,
        })
    };

    Ok(vec![
        leg(chain[call_at].1.call.as_ref())?,
        leg(chain[put_at].1.put.as_ref())?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn master() -> InstrumentMaster {
        let mut options = Vec::new();
        for strike in [24800, 24850, 24900, 24950, 25000, 25050, 25100] {
            for kind in ["CE", "PE"] {
                options.push(serde_json::json!({
                    "tradingsymbol": format!("NIFTY27OCT26{strike}{kind}"),
                    "instrument_token": format!("{strike}{kind}"),
                    "exchange": "NFO",
                    "underlying": "NIFTY",
                    "expiry": "2026-10-27",
                    "strike": strike,
                    "instrument_type": kind,
                }));
            }
        }
        let raw = serde_json::json!({
            "underlyings": [{
                "symbol": "NIFTY",
                "exchange": "NSE",
                "trading_symbol": "Nifty 50",
                "instrument_token": "99926000",
            }],
            "options": options,
        });
        InstrumentMaster::from_json(&raw.to_string()).unwrap()
    }

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 27).unwrap()
    }

    #[tokio::test]
    async fn resolves_tokens_for_options_and_spot() {
        let m = master();
        assert_eq!(
            m.resolve_token("NFO", "NIFTY27OCT2625000CE").await.unwrap(),
            "25000CE"
        );
        assert_eq!(m.resolve_token("NSE", "Nifty 50").await.unwrap(), "99926000");
        assert!(matches!(
            m.resolve_token("NFO", "NIFTY27OCT2699999CE").await,
            Err(CollaboratorError::InstrumentNotFound { .. })
        ));
    }

    #[test]
    fn straddle_sells_atm_pair() {
        let legs = select_legs(
            &master(),
            "nifty",
            expiry(),
            StrategyKind::ShortStraddle,
            dec!(24968.4),
            2,
            75,
        )
        .unwrap();

        assert_eq!(legs.len(), 2);
        assert!(legs.iter().all(|l| l.side == Side::Sell && l.quantity == 75));
        assert!(legs.iter().all(|l| l.strike == dec!(24950)));
        assert_eq!(legs[0].option_type, OptionType::Call);
        assert_eq!(legs[1].option_type, OptionType::Put);
    }

    #[test]
    fn atm_tie_goes_to_lower_strike() {
        assert_eq!(atm_index(&[dec!(100), dec!(150)], dec!(125)), Some(0));
        assert_eq!(atm_index(&[], dec!(125)), None);
    }

    #[test]
    fn long_straddle_buys() {
        let legs = select_legs(
            &master(),
            "NIFTY",
            expiry(),
            StrategyKind::LongStraddle,
            dec!(25010),
            2,
            75,
        )
        .unwrap();
        assert!(legs.iter().all(|l| l.side == Side::Buy && l.strike == dec!(25000)));
    }

    #[test]
    fn strangle_steps_out_from_atm() {
        let legs = select_legs(
            &master(),
            "NIFTY",
            expiry(),
            StrategyKind::ShortStrangle,
            dec!(24950),
            2,
            75,
        )
        .unwrap();
        assert_eq!(legs[0].strike, dec!(25050));
        assert_eq!(legs[0].option_type, OptionType::Call);
        assert_eq!(legs[1].strike, dec!(24850));
        assert_eq!(legs[1].option_type, OptionType::Put);
    }

    #[test]
    fn strangle_past_chain_edge_has_no_strikes() {
        let result = select_legs(
            &master(),
            "NIFTY",
            expiry(),
            StrategyKind::ShortStrangle,
            dec!(25100),
            2,
            75,
        );
        assert!(matches!(result, Err(CollaboratorError::NoStrikesAvailable { .. })));
    }

    #[test]
    fn unknown_expiry_has_no_strikes() {
        let result = select_legs(
            &master(),
            "NIFTY",
            NaiveDate::from_ymd_opt(2026, 11, 3).unwrap(),
            StrategyKind::ShortStraddle,
            dec!(25000),
            2,
            75,
        );
        assert!(matches!(result, Err(CollaboratorError::NoStrikesAvailable { .. })));
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!(StrategyKind::parse("SHORT_STRADDLE"), Some(StrategyKind::ShortStraddle));
        assert_eq!(StrategyKind::parse("iron_condor"), None);
    }

    #[test]
    fn loads_master_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instruments.json");
        std::fs::write(
            &path,
            r#"{"underlyings":[{"symbol":"banknifty","exchange":"NSE","trading_symbol":"Nifty Bank","instrument_token":"99926009"}]}"#,
        )
        .unwrap();

        let m = InstrumentMaster::load(&path).unwrap();
        assert_eq!(m.underlying("BANKNIFTY").unwrap().instrument_token, "99926009");
        assert!(InstrumentMaster::load(dir.path().join("missing.json")).is_err());
    }
}
