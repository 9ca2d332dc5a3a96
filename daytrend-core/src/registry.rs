//! InstrumentRegistry — read-only futures catalog.
//!
//! Built once before any strategy exists and shared via `Arc`; the `Arc`
//! publication gives every holder read-after-init visibility. Strategies
//! keep a non-owning handle (the registry never references strategies), so
//! there is no ownership cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::{root_symbol, Instrument};
use crate::error::CoreError;

#[derive(Debug, Default)]
pub struct InstrumentRegistry {
    instruments: BTreeMap<String, Instrument>,
}

impl InstrumentRegistry {
    /// Build the catalog, validating every contract's metadata.
    pub fn new(instruments: Vec<Instrument>) -> Result<Self, CoreError> {
        let mut map = BTreeMap::new();
        for inst in instruments {
            inst.validate()?;
            map.insert(inst.symbol.clone(), inst);
        }
        Ok(Self { instruments: map })
    }

    /// Convenience constructor for the shared process-wide handle.
    pub fn shared(instruments: Vec<Instrument>) -> Result<Arc<Self>, CoreError> {
        Ok(Arc::new(Self::new(instruments)?))
    }

    /// Look up by symbol; roll suffixes (`.v.N`, `.c.N`) normalize to the root.
    pub fn get(&self, symbol: &str) -> Result<&Instrument, CoreError> {
        let root = root_symbol(symbol);
        self.instruments
            .get(root)
            .ok_or_else(|| CoreError::MissingInstrument(symbol.to_string()))
    }

    pub fn multiplier(&self, symbol: &str) -> Result<f64, CoreError> {
        Ok(self.get(symbol)?.multiplier)
    }

    pub fn commission_per_contract(&self, symbol: &str) -> Result<f64, CoreError> {
        Ok(self.get(symbol)?.commission_per_contract)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.instruments.contains_key(root_symbol(symbol))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.instruments.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Pre-run admission check: every symbol in the universe must resolve to
    /// a contract with positive margin metadata. Missing metadata aborts the
    /// run before any strategy is constructed.
    pub fn validate_universe(&self, symbols: &[String]) -> Result<(), CoreError> {
        for symbol in symbols {
            let inst = self.get(symbol)?;
            if !(inst.initial_margin > 0.0) || !(inst.maintenance_margin > 0.0) {
                return Err(CoreError::invalid_data(format!(
                    "missing or non-positive margin metadata for {symbol}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn es() -> Instrument {
        Instrument {
            symbol: "ES".into(),
            multiplier: 50.0,
            tick_size: 0.25,
            initial_margin: 12_000.0,
            maintenance_margin: 11_000.0,
            commission_per_contract: 2.50,
            trading_hours: "17:00-16:00 CT".into(),
            expiry: None,
        }
    }

    fn gc() -> Instrument {
        Instrument {
            symbol: "GC".into(),
            multiplier: 100.0,
            tick_size: 0.10,
            initial_margin: 10_000.0,
            maintenance_margin: 9_000.0,
            commission_per_contract: 2.50,
            trading_hours: "17:00-16:00 CT".into(),
            expiry: Some(NaiveDate::from_ymd_opt(2024, 12, 27).unwrap()),
        }
    }

    #[test]
    fn lookup_by_root_and_roll_suffix() {
        let reg = InstrumentRegistry::new(vec![es(), gc()]).unwrap();
        assert_eq!(reg.get("ES").unwrap().multiplier, 50.0);
        assert_eq!(reg.get("ES.v.0").unwrap().multiplier, 50.0);
        assert_eq!(reg.get("GC.c.1").unwrap().multiplier, 100.0);
    }

    #[test]
    fn unknown_symbol_is_metadata_error() {
        let reg = InstrumentRegistry::new(vec![es()]).unwrap();
        assert!(matches!(
            reg.get("CL"),
            Err(CoreError::MissingInstrument(_))
        ));
    }

    #[test]
    fn invalid_metadata_rejected_at_construction() {
        let mut bad = es();
        bad.initial_margin = 0.0;
        assert!(InstrumentRegistry::new(vec![bad]).is_err());
    }

    #[test]
    fn universe_validation_flags_missing_symbol() {
        let reg = InstrumentRegistry::new(vec![es()]).unwrap();
        let universe = vec!["ES".to_string(), "CL".to_string()];
        assert!(reg.validate_universe(&universe).is_err());
    }

    #[test]
    fn symbols_iterate_sorted() {
        let reg = InstrumentRegistry::new(vec![gc(), es()]).unwrap();
        let symbols: Vec<&str> = reg.symbols().collect();
        assert_eq!(symbols, vec!["ES", "GC"]);
    }
}
