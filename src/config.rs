//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files, and validation
//! into the [`StrategyParams`] the simulation core consumes. Validation
//! happens once, before any bar is processed; a run never fails mid-way
//! because of configuration.

use anyhow::{Context, Result};
use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{BacktestError, CoreResult};

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backtest: BacktestConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    /// Grid search parameters for optimization (optional)
    /// Each key is a strategy param name (or `backtest.<field>`), value is array of values to test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<BTreeMap<String, Vec<serde_json::Value>>>,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        Ok(config)
    }

    /// Validate and convert into the parameters the engine runs with
    pub fn params(&self) -> CoreResult<StrategyParams> {
        StrategyParams::try_from(self)
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.params().map(|_| ())
    }

    /// Apply a set of `name -> value` overrides.
    ///
    /// Plain names target the `strategy` section; `backtest.` and `analytics.`
    /// prefixes target the other sections. Unknown fields are rejected.
    pub fn with_overrides(&self, overrides: &BTreeMap<String, serde_json::Value>) -> Result<Self> {
        let mut value = serde_json::to_value(self).context("Failed to serialize config")?;

        for (key, new_value) in overrides {
            let (section, field) = match key.split_once('.') {
                Some((section, field)) => (section, field),
                None => ("strategy", key.as_str()),
            };
            let section_obj = value
                .get_mut(section)
                .and_then(|v| v.as_object_mut())
                .with_context(|| format!("Unknown config section '{}' in override", section))?;
            section_obj.insert(field.to_string(), new_value.clone());
        }

        serde_json::from_value(value).context("Override produced an invalid config")
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backtest: BacktestConfig::default(),
            strategy: StrategyConfig::default(),
            analytics: AnalyticsConfig::default(),
            grid: None,
        }
    }
}

/// How commission is computed when slippage is non-zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionBasis {
    /// Slippage first, commission on the slipped notional
    #[default]
    FillPrice,
    /// Commission on the pre-slippage notional
    ReferencePrice,
}

/// Backtest configuration
///
/// All values are currency-agnostic: `initial_capital` must be denominated in
/// the same currency as the price data, no conversion is performed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BacktestConfig {
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    /// Inclusive start date (YYYY-MM-DD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// Inclusive end date (YYYY-MM-DD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    pub initial_capital: f64,
    pub commission_rate: f64,
    /// Adverse price movement as a fraction of the reference price
    #[serde(default)]
    pub slippage: f64,
    #[serde(default)]
    pub commission_basis: CommissionBasis,
}

fn default_timeframe() -> String {
    "1d".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_results_dir() -> String {
    "results".to_string()
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            symbol: "BTC/USDT".to_string(),
            timeframe: default_timeframe(),
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
            start_date: None,
            end_date: None,
            initial_capital: 10_000.0,
            commission_rate: 0.001, // 0.1%
            slippage: 0.0,
            commission_basis: CommissionBasis::FillPrice,
        }
    }
}

/// Strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    pub n_day_high_period: usize,
    pub buy_window: TimeWindow,
    pub sell_window: TimeWindow,
    pub eligible_entry_weekdays: Vec<Weekday>,
    pub holding_period_days: usize,
    pub buy_cash_percentage: f64,
    #[serde(default = "default_sell_asset_percentage")]
    pub sell_asset_percentage: f64,
    /// Annual risk-free rate used by the Sharpe ratio
    #[serde(default)]
    pub risk_free_rate: f64,
    /// IANA zone in which weekdays and windows are evaluated
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Permit buy and sell windows to overlap (enables same-bar exit then entry)
    #[serde(default)]
    pub allow_window_overlap: bool,
}

fn default_sell_asset_percentage() -> f64 {
    1.0
}

fn default_timezone() -> String {
    "Asia/Shanghai".to_string()
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            n_day_high_period: 20,
            buy_window: TimeWindow::new(TimeOfDay::hm(15, 55), TimeOfDay::hm(16, 5)),
            sell_window: TimeWindow::new(TimeOfDay::hm(9, 55), TimeOfDay::hm(10, 5)),
            eligible_entry_weekdays: vec![Weekday::Mon, Weekday::Tue, Weekday::Fri],
            holding_period_days: 1,
            buy_cash_percentage: 0.5,
            sell_asset_percentage: default_sell_asset_percentage(),
            risk_free_rate: 0.0,
            timezone: default_timezone(),
            allow_window_overlap: false,
        }
    }
}

/// Analytics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyticsConfig {
    /// Bars per year used to annualise returns (365 for crypto daily bars)
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
}

fn default_periods_per_year() -> f64 {
    365.0
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        AnalyticsConfig {
            periods_per_year: default_periods_per_year(),
        }
    }
}

// =============================================================================
// Time windows
// =============================================================================

/// Seconds since local midnight, in `[0, 86400]`.
///
/// Serialized as `"HH:MM"` or `"HH:MM:SS"`. `"24:00"` is accepted so a
/// half-open window can cover the end of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u32);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);
    pub const END_OF_DAY: TimeOfDay = TimeOfDay(SECONDS_PER_DAY);

    /// Build from hours and minutes; values past 24:00 are clamped
    pub fn hm(hour: u32, minute: u32) -> Self {
        TimeOfDay((hour * 3600 + minute * 60).min(SECONDS_PER_DAY))
    }

    pub fn from_seconds(seconds: u32) -> Option<Self> {
        (seconds <= SECONDS_PER_DAY).then_some(TimeOfDay(seconds))
    }

    pub fn seconds(self) -> u32 {
        self.0
    }
}

impl std::str::FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(format!("Invalid time '{}': expected HH:MM or HH:MM:SS", s));
        }

        let mut fields = [0u32; 3];
        for (slot, part) in fields.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("Invalid time '{}': '{}' is not a number", s, part))?;
        }
        let [hour, minute, second] = fields;

        if minute > 59 || second > 59 {
            return Err(format!("Invalid time '{}': minutes and seconds must be < 60", s));
        }
        let total = hour * 3600 + minute * 60 + second;
        if total > SECONDS_PER_DAY {
            return Err(format!("Invalid time '{}': must not exceed 24:00", s));
        }
        Ok(TimeOfDay(total))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, s) = (self.0 / 3600, (self.0 % 3600) / 60, self.0 % 60);
        if s == 0 {
            write!(f, "{:02}:{:02}", h, m)
        } else {
            write!(f, "{:02}:{:02}:{:02}", h, m, s)
        }
    }
}

/// Half-open local time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeWindow {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        TimeWindow { start, end }
    }

    /// Window covering the whole day
    pub fn all_day() -> Self {
        TimeWindow::new(TimeOfDay::MIDNIGHT, TimeOfDay::END_OF_DAY)
    }

    pub fn contains(&self, time: TimeOfDay) -> bool {
        self.start <= time && time < self.end
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// =============================================================================
// Validated parameters
// =============================================================================

/// Set of weekdays, indexed Monday = 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WeekdaySet([bool; 7]);

impl WeekdaySet {
    pub fn insert(&mut self, day: Weekday) {
        self.0[day.num_days_from_monday() as usize] = true;
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0[day.num_days_from_monday() as usize]
    }

    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|d| *d)
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = WeekdaySet::default();
        for day in iter {
            set.insert(day);
        }
        set
    }
}

/// Validated configuration consumed by the simulation core.
///
/// Fields are public so callers can tune a copy; [`StrategyParams::validate`]
/// re-checks every rule and the engine calls it on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyParams {
    pub n_day_high_period: usize,
    pub buy_window: TimeWindow,
    pub sell_window: TimeWindow,
    pub allow_window_overlap: bool,
    pub eligible_entry_weekdays: WeekdaySet,
    pub holding_period_days: usize,
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub slippage: f64,
    pub commission_basis: CommissionBasis,
    pub buy_cash_percentage: f64,
    pub sell_asset_percentage: f64,
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
    pub timezone: Tz,
}

fn in_unit_interval(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

impl StrategyParams {
    pub fn validate(&self) -> CoreResult<()> {
        if self.n_day_high_period == 0 {
            return Err(BacktestError::config("n_day_high_period must be a positive integer"));
        }
        if self.holding_period_days == 0 {
            return Err(BacktestError::config("holding_period_days must be a positive integer"));
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(BacktestError::config(format!(
                "initial_capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if !self.commission_rate.is_finite() || self.commission_rate < 0.0 {
            return Err(BacktestError::config(format!(
                "commission_rate must be >= 0, got {}",
                self.commission_rate
            )));
        }
        if !self.slippage.is_finite() || !(0.0..1.0).contains(&self.slippage) {
            return Err(BacktestError::config(format!(
                "slippage must be in [0, 1), got {}",
                self.slippage
            )));
        }
        if !in_unit_interval(self.buy_cash_percentage) {
            return Err(BacktestError::config(format!(
                "buy_cash_percentage must be in (0, 1], got {}",
                self.buy_cash_percentage
            )));
        }
        if !in_unit_interval(self.sell_asset_percentage) {
            return Err(BacktestError::config(format!(
                "sell_asset_percentage must be in (0, 1], got {}",
                self.sell_asset_percentage
            )));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(BacktestError::config("risk_free_rate must be finite"));
        }
        if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
            return Err(BacktestError::config(format!(
                "periods_per_year must be positive, got {}",
                self.periods_per_year
            )));
        }

        for (name, window) in [("buy_window", &self.buy_window), ("sell_window", &self.sell_window)] {
            if !window.is_well_formed() {
                return Err(BacktestError::config(format!(
                    "{} {} is malformed: start must be before end",
                    name, window
                )));
            }
        }
        if !self.allow_window_overlap && self.buy_window.overlaps(&self.sell_window) {
            return Err(BacktestError::config(format!(
                "buy_window {} overlaps sell_window {}",
                self.buy_window, self.sell_window
            )));
        }

        if self.eligible_entry_weekdays.is_empty() {
            return Err(BacktestError::config("eligible_entry_weekdays must not be empty"));
        }
        Ok(())
    }
}

impl TryFrom<&Config> for StrategyParams {
    type Error = BacktestError;

    fn try_from(config: &Config) -> CoreResult<Self> {
        let bt = &config.backtest;
        let st = &config.strategy;

        let timezone: Tz = st.timezone.parse().map_err(|e| {
            BacktestError::config(format!("unknown timezone '{}': {}", st.timezone, e))
        })?;

        let params = StrategyParams {
            n_day_high_period: st.n_day_high_period,
            buy_window: st.buy_window,
            sell_window: st.sell_window,
            allow_window_overlap: st.allow_window_overlap,
            eligible_entry_weekdays: st.eligible_entry_weekdays.iter().copied().collect(),
            holding_period_days: st.holding_period_days,
            initial_capital: bt.initial_capital,
            commission_rate: bt.commission_rate,
            slippage: bt.slippage,
            commission_basis: bt.commission_basis,
            buy_cash_percentage: st.buy_cash_percentage,
            sell_asset_percentage: st.sell_asset_percentage,
            risk_free_rate: st.risk_free_rate,
            periods_per_year: config.analytics.periods_per_year,
            timezone,
        };
        params.validate()?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let params = Config::default().params().unwrap();
        assert_eq!(params.n_day_high_period, 20);
        assert_eq!(params.timezone, chrono_tz::Asia::Shanghai);
        assert!(params.eligible_entry_weekdays.contains(Weekday::Fri));
        assert!(!params.eligible_entry_weekdays.contains(Weekday::Wed));
    }

    #[test]
    fn test_time_of_day_parsing() {
        assert_eq!("15:55".parse::<TimeOfDay>().unwrap(), TimeOfDay::hm(15, 55));
        assert_eq!("24:00".parse::<TimeOfDay>().unwrap(), TimeOfDay::END_OF_DAY);
        assert_eq!("09:30:15".parse::<TimeOfDay>().unwrap().seconds(), 9 * 3600 + 30 * 60 + 15);
        assert!("24:01".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
        assert!("12".parse::<TimeOfDay>().is_err());
        assert_eq!(TimeOfDay::hm(9, 5).to_string(), "09:05");
    }

    #[test]
    fn test_time_window_is_half_open() {
        let window = TimeWindow::new(TimeOfDay::hm(15, 55), TimeOfDay::hm(16, 0));
        assert!(window.contains(TimeOfDay::hm(15, 55)));
        assert!(window.contains(TimeOfDay::hm(15, 59)));
        assert!(!window.contains(TimeOfDay::hm(16, 0)));
        assert!(!window.contains(TimeOfDay::hm(15, 54)));
    }

    #[test]
    fn test_window_overlap() {
        let a = TimeWindow::new(TimeOfDay::hm(9, 0), TimeOfDay::hm(10, 0));
        let b = TimeWindow::new(TimeOfDay::hm(10, 0), TimeOfDay::hm(11, 0));
        let c = TimeWindow::new(TimeOfDay::hm(9, 30), TimeOfDay::hm(10, 30));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn test_rejects_non_positive_period() {
        let mut config = Config::default();
        config.strategy.n_day_high_period = 0;
        assert!(matches!(config.params(), Err(BacktestError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_non_positive_capital() {
        let mut config = Config::default();
        config.backtest.initial_capital = 0.0;
        assert!(matches!(config.params(), Err(BacktestError::InvalidConfig(_))));
        config.backtest.initial_capital = -5.0;
        assert!(matches!(config.params(), Err(BacktestError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_malformed_and_overlapping_windows() {
        let mut config = Config::default();
        config.strategy.buy_window = TimeWindow::new(TimeOfDay::hm(16, 0), TimeOfDay::hm(15, 0));
        assert!(matches!(config.params(), Err(BacktestError::InvalidConfig(_))));

        let mut config = Config::default();
        config.strategy.buy_window = TimeWindow::all_day();
        assert!(matches!(config.params(), Err(BacktestError::InvalidConfig(_))));

        config.strategy.allow_window_overlap = true;
        assert!(config.params().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_percentages() {
        let mut config = Config::default();
        config.strategy.buy_cash_percentage = 0.0;
        assert!(config.params().is_err());

        let mut config = Config::default();
        config.strategy.sell_asset_percentage = 1.5;
        assert!(config.params().is_err());
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        let mut config = Config::default();
        config.strategy.timezone = "Mars/Olympus_Mons".to_string();
        assert!(matches!(config.params(), Err(BacktestError::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_json_config() {
        let json = r#"{
            "backtest": {
                "symbol": "BTC/USDT",
                "initial_capital": 10000.0,
                "commission_rate": 0.001,
                "slippage": 0.0005,
                "commission_basis": "reference_price"
            },
            "strategy": {
                "n_day_high_period": 3,
                "buy_window": { "start": "15:55", "end": "16:05" },
                "sell_window": { "start": "09:55", "end": "10:05" },
                "eligible_entry_weekdays": ["Mon", "Tue", "Fri"],
                "holding_period_days": 1,
                "buy_cash_percentage": 0.5
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.backtest.timeframe, "1d");
        assert_eq!(config.backtest.commission_basis, CommissionBasis::ReferencePrice);
        assert_eq!(config.strategy.sell_asset_percentage, 1.0);
        assert_eq!(config.analytics.periods_per_year, 365.0);

        let params = config.params().unwrap();
        assert_eq!(params.buy_window.start, TimeOfDay::hm(15, 55));
        assert_eq!(params.slippage, 0.0005);
    }

    #[test]
    fn test_validate_catches_edited_params() {
        let valid = Config::default().params().unwrap();
        assert!(valid.validate().is_ok());

        let mut params = valid.clone();
        params.slippage = 1.0;
        assert!(matches!(params.validate(), Err(BacktestError::InvalidConfig(_))));

        let mut params = valid.clone();
        params.eligible_entry_weekdays = WeekdaySet::default();
        assert!(matches!(params.validate(), Err(BacktestError::InvalidConfig(_))));

        let mut params = valid;
        params.periods_per_year = 0.0;
        assert!(matches!(params.validate(), Err(BacktestError::InvalidConfig(_))));
    }

    #[test]
    fn test_with_overrides() {
        let config = Config::default();
        let mut overrides = BTreeMap::new();
        overrides.insert("n_day_high_period".to_string(), serde_json::json!(7));
        overrides.insert("backtest.commission_rate".to_string(), serde_json::json!(0.002));

        let updated = config.with_overrides(&overrides).unwrap();
        assert_eq!(updated.strategy.n_day_high_period, 7);
        assert_eq!(updated.backtest.commission_rate, 0.002);

        let mut bad = BTreeMap::new();
        bad.insert("no_such_field".to_string(), serde_json::json!(1));
        assert!(config.with_overrides(&bad).is_err());
    }
}
