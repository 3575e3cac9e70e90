//! Options volume walls ("Hunter Walls").
//!
//! Aggregates traded CALL and PUT volume per strike for groups of expiration
//! months and reports the heaviest strikes around spot.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::EngineConfig;
use crate::dispatcher::{parse_params, AnalysisInput, Analyzer, DataNeeds, RequestContext};
use crate::error::{EngineError, EngineResult};
use crate::types::{AnalysisResult, AnalyzerId, OptionContract, OptionSide, Period};

const TOP_PER_SIDE: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HunterWallsParams {
    /// Expiration groups as month-letter strings, e.g. `["F", "GH"]`.
    /// Empty means one group with the nearest expiration's letter.
    pub groups: Vec<String>,
    pub top_n: usize,
    pub min_volume: u64,
}

impl Default for HunterWallsParams {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            top_n: 10,
            min_volume: 10,
        }
    }
}

impl HunterWallsParams {
    pub fn validate(&self) -> EngineResult<()> {
        for group in &self.groups {
            let valid = !group.trim().is_empty()
                && group
                    .trim()
                    .chars()
                    .all(|c| matches!(c.to_ascii_uppercase(), 'A'..='L'));
            if !valid {
                return Err(EngineError::Validation(format!(
                    "invalid expiration group {:?}: use month letters A-L",
                    group
                )));
            }
        }
        if self.groups.len() > 12 {
            return Err(EngineError::Validation("at most 12 expiration groups".into()));
        }
        if self.top_n == 0 || self.top_n > 100 {
            return Err(EngineError::Validation("top_n must be in [1, 100]".into()));
        }
        Ok(())
    }

    fn letter_groups(&self) -> Vec<Vec<char>> {
        self.groups
            .iter()
            .map(|g| {
                let mut letters: Vec<char> = g.trim().chars().map(|c| c.to_ascii_uppercase()).collect();
                letters.sort_unstable();
                letters.dedup();
                letters
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StrikeVolume {
    pub call: u64,
    pub put: u64,
}

impl StrikeVolume {
    pub fn combined(&self) -> u64 {
        self.call + self.put
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Wall {
    pub strike: Decimal,
    pub call_volume: u64,
    pub put_volume: u64,
    pub combined: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupWalls {
    pub letters: String,
    /// Every strike seen in the group, ascending
    pub strikes: BTreeMap<Decimal, StrikeVolume>,
    /// Top-N strikes by combined volume, displayed ascending
    pub walls: Vec<Wall>,
    /// Index into `walls` of the strike nearest spot
    pub spot_index: Option<usize>,
    pub total_call_volume: u64,
    pub total_put_volume: u64,
    /// 0 when the group traded no calls
    pub put_call_ratio: f64,
    pub top_calls: Vec<Decimal>,
    pub top_puts: Vec<Decimal>,
}

impl GroupWalls {
    pub fn pcr_undefined(&self) -> bool {
        self.total_call_volume == 0
    }
}

fn is_tradeable(contract: &OptionContract) -> bool {
    contract.volume > 0 && contract.strike > Decimal::ZERO
}

/// Month letter of the nearest expiration among tradeable contracts
pub fn nearest_letter(chain: &[OptionContract]) -> Option<char> {
    chain
        .iter()
        .filter(|c| is_tradeable(c))
        .min_by_key(|c| c.expiration)
        .map(OptionContract::month_letter)
}

fn top_strikes(strikes: &BTreeMap<Decimal, StrikeVolume>, side: OptionSide) -> Vec<Decimal> {
    let volume = |v: &StrikeVolume| match side {
        OptionSide::Call => v.call,
        OptionSide::Put => v.put,
    };
    let mut ranked: Vec<(Decimal, u64)> = strikes
        .iter()
        .map(|(k, v)| (*k, volume(v)))
        .filter(|(_, v)| *v > 0)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(TOP_PER_SIDE).map(|(k, _)| k).collect()
}

/// Nearest strike to `spot`; ties go to the lower strike
fn nearest_index(walls: &[Wall], spot: Decimal) -> Option<usize> {
    walls
        .iter()
        .enumerate()
        .min_by_key(|(_, w)| (w.strike - spot).abs())
        .map(|(i, _)| i)
}

pub fn aggregate_group(
    chain: &[OptionContract],
    letters: &[char],
    spot: Decimal,
    params: &HunterWallsParams,
) -> GroupWalls {
    let mut strikes: BTreeMap<Decimal, StrikeVolume> = BTreeMap::new();
    for contract in chain
        .iter()
        .filter(|c| is_tradeable(c) && letters.contains(&c.month_letter()))
    {
        let entry = strikes.entry(contract.strike.normalize()).or_default();
        match contract.side {
            OptionSide::Call => entry.call += contract.volume,
            OptionSide::Put => entry.put += contract.volume,
        }
    }

    let total_call_volume: u64 = strikes.values().map(|v| v.call).sum();
    let total_put_volume: u64 = strikes.values().map(|v| v.put).sum();
    let put_call_ratio = if total_call_volume > 0 {
        total_put_volume as f64 / total_call_volume as f64
    } else {
        0.0
    };

    let mut walls: Vec<Wall> = strikes
        .iter()
        .filter(|(_, v)| v.combined() >= params.min_volume)
        .map(|(strike, v)| Wall {
            strike: *strike,
            call_volume: v.call,
            put_volume: v.put,
            combined: v.combined(),
        })
        .collect();
    walls.sort_by(|a, b| b.combined.cmp(&a.combined).then(a.strike.cmp(&b.strike)));
    walls.truncate(params.top_n);
    walls.sort_by(|a, b| a.strike.cmp(&b.strike));

    GroupWalls {
        letters: letters.iter().collect(),
        spot_index: nearest_index(&walls, spot),
        top_calls: top_strikes(&strikes, OptionSide::Call),
        top_puts: top_strikes(&strikes, OptionSide::Put),
        strikes,
        walls,
        total_call_volume,
        total_put_volume,
        put_call_ratio,
    }
}

pub struct HunterWallsAnalyzer;

impl Analyzer for HunterWallsAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::HunterWalls
    }

    fn name(&self) -> &'static str {
        "Hunter Walls"
    }

    fn default_period(&self) -> Period {
        Period::OneMonth
    }

    fn validate_params(&self, params: &Value) -> EngineResult<()> {
        parse_params::<HunterWallsParams>(params)?.validate()
    }

    fn data_needs(&self, ctx: &RequestContext, _config: &EngineConfig) -> EngineResult<DataNeeds> {
        let mut needs = DataNeeds::bars([ctx.symbol.to_string()], Period::OneMonth);
        needs.option_chain = Some(ctx.symbol.to_string());
        Ok(needs)
    }

    fn analyze(
        &self,
        ctx: &RequestContext,
        input: &AnalysisInput,
        _config: &EngineConfig,
    ) -> EngineResult<AnalysisResult> {
        let params: HunterWallsParams = parse_params(&ctx.params)?;
        let chain = input.chain(ctx.symbol.as_str())?;
        let frame = input.frame(ctx.symbol.as_str())?;
        let spot_price = frame
            .last_close()
            .ok_or_else(|| EngineError::InsufficientData("no spot price".into()))?;
        let spot = Decimal::from_f64(spot_price)
            .ok_or_else(|| EngineError::InsufficientData("spot price not representable".into()))?
            .round_dp(4);

        let mut groups = params.letter_groups();
        if groups.is_empty() {
            let letter = nearest_letter(chain)
                .ok_or_else(|| EngineError::InsufficientData("no traded contracts".into()))?;
            groups.push(vec![letter]);
        }

        let results: Vec<GroupWalls> = groups
            .iter()
            .map(|letters| aggregate_group(chain, letters, spot, &params))
            .collect();
        debug!(
            symbol = %ctx.symbol,
            contracts = chain.len(),
            groups = results.len(),
            "Aggregated option walls"
        );

        let mut result = AnalysisResult::ok(self.id(), ctx.symbol.as_str());
        result.metric("spot", spot_price).metric("contracts", chain.len());
        if let Some(primary) = results.first() {
            let as_f64 = |d: Option<&Decimal>| d.and_then(|d| d.to_f64()).unwrap_or(0.0);
            result
                .metric("group", primary.letters.as_str())
                .metric("total_call_volume", primary.total_call_volume)
                .metric("total_put_volume", primary.total_put_volume)
                .metric("put_call_ratio", primary.put_call_ratio)
                .metric("top_call_wall", as_f64(primary.top_calls.first()))
                .metric("top_put_wall", as_f64(primary.top_puts.first()))
                .metric("walls", primary.walls.len())
                .metric(
                    "spot_strike",
                    as_f64(primary.spot_index.map(|i| &primary.walls[i].strike)),
                );
        }
        if results.iter().any(GroupWalls::pcr_undefined) {
            result.warn("pcr_undefined");
        }
        if results.iter().any(|g| g.walls.is_empty()) {
            result.warn("no_walls");
        }

        result.details = Some(json!({
            "groups": results,
            "params": params,
        }));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{contract, june_chain};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn june() -> Vec<char> {
        vec!['F']
    }

    #[test]
    fn test_june_walls() {
        let walls = aggregate_group(&june_chain(), &june(), dec!(30), &HunterWallsParams::default());

        assert_eq!(walls.top_calls[0], dec!(32));
        assert_eq!(walls.top_puts[0], dec!(28));
        let strikes: Vec<Decimal> = walls.walls.iter().map(|w| w.strike).collect();
        assert_eq!(strikes, vec![dec!(26), dec!(28), dec!(30), dec!(32), dec!(34)]);
        assert_eq!(walls.walls[walls.spot_index.unwrap()].strike, dec!(30));
        assert_eq!(walls.letters, "F");
    }

    #[test]
    fn test_volume_is_conserved_per_group() {
        let chain = june_chain();
        let walls = aggregate_group(&chain, &june(), dec!(30), &HunterWallsParams::default());
        let calls: u64 = chain
            .iter()
            .filter(|c| c.side == OptionSide::Call && c.month_letter() == 'F')
            .map(|c| c.volume)
            .sum();
        let puts: u64 = chain
            .iter()
            .filter(|c| c.side == OptionSide::Put && c.month_letter() == 'F')
            .map(|c| c.volume)
            .sum();
        assert_eq!(walls.total_call_volume, calls);
        assert_eq!(walls.total_put_volume, puts);
        assert_eq!(walls.strikes.values().map(|v| v.call).sum::<u64>(), calls);
        assert!((walls.put_call_ratio - 4_900.0 / 6_303.0).abs() < 1e-12);
    }

    #[test]
    fn test_min_volume_floor_and_top_n() {
        let params = HunterWallsParams {
            top_n: 2,
            ..Default::default()
        };
        let walls = aggregate_group(&june_chain(), &june(), dec!(30), &params);
        let strikes: Vec<Decimal> = walls.walls.iter().map(|w| w.strike).collect();
        assert_eq!(strikes, vec![dec!(28), dec!(32)]);
        // spot 30 is equidistant from 28 and 32
        assert_eq!(walls.spot_index, Some(0));
        assert!(!walls.strikes.is_empty());
    }

    #[test]
    fn test_groups_span_several_months() {
        let walls = aggregate_group(&june_chain(), &['F', 'G'], dec!(30), &HunterWallsParams::default());
        assert_eq!(walls.top_calls[0], dec!(40));
        assert_eq!(walls.letters, "FG");
    }

    #[test]
    fn test_put_only_group_has_zero_ratio() {
        let exp = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let chain = vec![
            contract(OptionSide::Put, dec!(20), exp, 500),
            contract(OptionSide::Put, dec!(0), exp, 900),
            contract(OptionSide::Call, dec!(22), exp, 0),
        ];
        let walls = aggregate_group(&chain, &['C'], dec!(21), &HunterWallsParams::default());
        assert!(walls.pcr_undefined());
        assert_eq!(walls.put_call_ratio, 0.0);
        assert_eq!(walls.total_put_volume, 500);
        assert!(walls.top_calls.is_empty());
    }

    #[test]
    fn test_nearest_letter_skips_dead_contracts() {
        let mut chain = june_chain();
        let may = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();
        chain.push(contract(OptionSide::Call, dec!(30), may, 0));
        assert_eq!(nearest_letter(&chain), Some('F'));
        chain.push(contract(OptionSide::Call, dec!(30), may, 5));
        assert_eq!(nearest_letter(&chain), Some('E'));
        assert_eq!(nearest_letter(&[]), None);
    }

    #[test]
    fn test_params_validation() {
        let analyzer = HunterWallsAnalyzer;
        assert!(analyzer.validate_params(&Value::Null).is_ok());
        assert!(analyzer.validate_params(&json!({"groups": ["fg"]})).is_ok());
        assert!(analyzer.validate_params(&json!({"groups": ["Z"]})).is_err());
        assert!(analyzer.validate_params(&json!({"groups": [""]})).is_err());
        assert!(analyzer.validate_params(&json!({"top_n": 0})).is_err());
    }
}
