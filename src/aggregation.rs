//! The three price calculators (VWAP, TWAP, source-weighted mean), their
//! shared outlier-filtering pass, confidence scoring, and the best-price
//! selector that picks among whichever calculators succeeded.

use std::time::{Duration, Instant};

use rust_decimal::Decimal;

use crate::config::AggregationConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::{Algorithm, AggregatedPrice, AggregationResult, AlgorithmDetail, Observation, Pair};
use crate::stats::{iqr_filter, mean, stddev, zscore_filter};

/// Observations the weighted fallback draws from after outlier filtering.
const WEIGHTED_FALLBACK_WINDOW: usize = 10;
const SOURCE_DIVERSITY_TARGET: f64 = 3.0;
const DATA_POINTS_TARGET: f64 = 10.0;

/// Runs z-score filtering, then recomputes IQR bounds on the survivors —
/// a deliberate two-pass filter, not a bug: z-score catches gross outliers
/// first so the IQR bounds computed on the second pass aren't themselves
/// skewed by them.
fn filter_outliers(prices: &[f64], config: &AggregationConfig) -> Vec<usize> {
    let z_survivors = zscore_filter(prices, config.z_score_threshold);
    let after_z: Vec<f64> = z_survivors.iter().map(|&i| prices[i]).collect();
    let iqr_survivors = iqr_filter(&after_z, config.iqr_multiplier);
    iqr_survivors.into_iter().map(|local| z_survivors[local]).collect()
}

/// `0.30·dataPoints + 0.30·sourceDiversity + 0.30·consistency + 0.10·trust`,
/// clamped to `[0, 1]`.
fn confidence_score(n: usize, source_count: usize, price_mean: f64, price_stddev: f64, mean_source_weight: f64) -> f64 {
    let data_points = (n as f64 / DATA_POINTS_TARGET).min(1.0);
    let source_diversity = (source_count as f64 / SOURCE_DIVERSITY_TARGET).min(1.0);
    let consistency = if price_mean.abs() > f64::EPSILON {
        (1.0 - price_stddev / price_mean.abs()).max(0.0)
    } else {
        0.0
    };
    let confidence = 0.30 * data_points + 0.30 * source_diversity + 0.30 * consistency + 0.10 * mean_source_weight;
    confidence.clamp(0.0, 1.0)
}

fn mean_weight(observations: &[&Observation]) -> f64 {
    if observations.is_empty() {
        return 0.0;
    }
    observations.iter().map(|o| o.weight).sum::<f64>() / observations.len() as f64
}

fn require_min_points(available: usize, config: &AggregationConfig) -> EngineResult<()> {
    if available < config.min_data_points {
        return Err(EngineError::InsufficientData {
            required: config.min_data_points,
            available,
        });
    }
    Ok(())
}

fn within_window(observation: &Observation, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(observation.recorded_at) <= window
}

/// Volume-weighted average price over observations carrying a volume at
/// or above `minVolume`, within `window` of now (or `vwapWindow` from
/// config when the caller doesn't override it).
pub fn vwap(
    pair: &Pair,
    observations: &[Observation],
    config: &AggregationConfig,
    window_override: Option<Duration>,
) -> EngineResult<AggregationResult> {
    let window = window_override.unwrap_or_else(|| Duration::from_millis(config.vwap_window_ms));
    let now = Instant::now();

    let floored: Vec<&Observation> = observations
        .iter()
        .filter(|o| within_window(o, now, window))
        .filter(|o| o.volume_f64().is_some_and(|v| v >= config.min_volume))
        .collect();
    if floored.is_empty() {
        return Err(EngineError::NoVolumeData);
    }
    require_min_points(floored.len(), config)?;

    let prices: Vec<f64> = floored.iter().map(|o| o.price_f64()).collect();
    let survivors = filter_outliers(&prices, config);
    if survivors.is_empty() {
        return Err(EngineError::AllOutliers);
    }

    let mut numerator = Decimal::ZERO;
    let mut denominator = Decimal::ZERO;
    for &i in &survivors {
        let obs = floored[i];
        let volume = obs.volume.expect("filtered for volume above");
        numerator += obs.price * volume;
        denominator += volume;
    }
    if denominator.is_zero() {
        // Every surviving observation's volume nets to zero — by
        // elimination this is a volume-data problem, not a weighting one;
        // `ZeroWeight` is reserved for TWAP/weighted.
        return Err(EngineError::NoVolumeData);
    }
    let price = numerator / denominator;

    let survivor_obs: Vec<&Observation> = survivors.iter().map(|&i| floored[i]).collect();
    let survivor_prices: Vec<f64> = survivors.iter().map(|&i| prices[i]).collect();
    let price_mean = mean(&survivor_prices);
    let price_stddev = stddev(&survivor_prices);
    let sources = dedup_sources(survivor_obs.iter().map(|o| o.source.clone()));
    let total_volume: f64 = survivor_obs.iter().filter_map(|o| o.volume_f64()).sum();

    Ok(AggregationResult {
        pair: pair.clone(),
        algorithm: Algorithm::Vwap,
        price: price.try_into().unwrap_or(f64::NAN),
        sources: sources.clone(),
        inputs_used: survivors.len(),
        outliers_removed: floored.len() - survivors.len(),
        confidence: confidence_score(survivors.len(), sources.len(), price_mean, price_stddev, mean_weight(&survivor_obs)),
        min_price: survivor_prices.iter().cloned().fold(f64::INFINITY, f64::min),
        max_price: survivor_prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        detail: AlgorithmDetail {
            total_volume: Some(total_volume),
            mean_volume: Some(total_volume / survivors.len() as f64),
            time_span_secs: None,
            price_stddev: Some(price_stddev),
        },
    })
}

/// Time-weighted average price: each surviving price is weighted by how
/// long it remained the most recent observation, times its own source
/// weight. The final observation is weighted by its age, capped at
/// `twapWindow`.
pub fn twap(
    pair: &Pair,
    observations: &[Observation],
    config: &AggregationConfig,
    window_override: Option<Duration>,
) -> EngineResult<AggregationResult> {
    let window = window_override.unwrap_or_else(|| Duration::from_millis(config.twap_window_ms));
    let now = Instant::now();

    let windowed: Vec<&Observation> = observations.iter().filter(|o| within_window(o, now, window)).collect();
    require_min_points(windowed.len(), config)?;

    let prices: Vec<f64> = windowed.iter().map(|o| o.price_f64()).collect();
    let survivors = filter_outliers(&prices, config);
    if survivors.is_empty() {
        return Err(EngineError::AllOutliers);
    }

    let mut ordered: Vec<&Observation> = survivors.iter().map(|&i| windowed[i]).collect();
    ordered.sort_by_key(|o| o.recorded_at);

    let mut numerator = Decimal::ZERO;
    let mut total_weight_secs = 0.0_f64;
    for (idx, obs) in ordered.iter().enumerate() {
        let time_weight_secs = if idx + 1 < ordered.len() {
            ordered[idx + 1].recorded_at.duration_since(obs.recorded_at).as_secs_f64()
        } else {
            now.saturating_duration_since(obs.recorded_at).min(window).as_secs_f64()
        };
        let combined_weight = time_weight_secs.max(0.0) * obs.weight;
        let weight_decimal = Decimal::try_from(combined_weight).unwrap_or(Decimal::ZERO);
        numerator += obs.price * weight_decimal;
        total_weight_secs += combined_weight;
    }

    if total_weight_secs <= 0.0 {
        return Err(EngineError::ZeroWeight);
    }
    let denominator = Decimal::try_from(total_weight_secs).unwrap_or(Decimal::ZERO);
    let price = numerator / denominator;

    let survivor_prices: Vec<f64> = survivors.iter().map(|&i| prices[i]).collect();
    let price_mean = mean(&survivor_prices);
    let price_stddev = stddev(&survivor_prices);
    let sources = dedup_sources(ordered.iter().map(|o| o.source.clone()));

    Ok(AggregationResult {
        pair: pair.clone(),
        algorithm: Algorithm::Twap,
        price: price.try_into().unwrap_or(f64::NAN),
        sources: sources.clone(),
        inputs_used: survivors.len(),
        outliers_removed: windowed.len() - survivors.len(),
        confidence: confidence_score(survivors.len(), sources.len(), price_mean, price_stddev, mean_weight(&ordered)),
        min_price: survivor_prices.iter().cloned().fold(f64::INFINITY, f64::min),
        max_price: survivor_prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        detail: AlgorithmDetail {
            total_volume: None,
            mean_volume: None,
            time_span_secs: Some(total_weight_secs),
            price_stddev: Some(price_stddev),
        },
    })
}

/// Source-weighted mean over the most recent ten observations surviving
/// outlier filtering. The fallback calculator: used by the selector when
/// VWAP and TWAP both fail.
pub fn weighted(pair: &Pair, observations: &[Observation], config: &AggregationConfig) -> EngineResult<AggregationResult> {
    require_min_points(observations.len(), config)?;

    let prices: Vec<f64> = observations.iter().map(|o| o.price_f64()).collect();
    let survivors = filter_outliers(&prices, config);
    if survivors.is_empty() {
        return Err(EngineError::AllOutliers);
    }

    let mut recent: Vec<&Observation> = survivors.iter().map(|&i| &observations[i]).collect();
    recent.sort_by_key(|o| std::cmp::Reverse(o.recorded_at));
    recent.truncate(WEIGHTED_FALLBACK_WINDOW);

    let mut numerator = Decimal::ZERO;
    let mut total_weight = 0.0_f64;
    for obs in &recent {
        let weight_decimal = Decimal::try_from(obs.weight).unwrap_or(Decimal::ZERO);
        numerator += obs.price * weight_decimal;
        total_weight += obs.weight;
    }
    if total_weight <= 0.0 {
        return Err(EngineError::ZeroWeight);
    }
    let denominator = Decimal::try_from(total_weight).unwrap_or(Decimal::ZERO);
    let price = numerator / denominator;

    let recent_prices: Vec<f64> = recent.iter().map(|o| o.price_f64()).collect();
    let price_mean = mean(&recent_prices);
    let price_stddev = stddev(&recent_prices);
    let sources = dedup_sources(recent.iter().map(|o| o.source.clone()));

    Ok(AggregationResult {
        pair: pair.clone(),
        algorithm: Algorithm::Weighted,
        price: price.try_into().unwrap_or(f64::NAN),
        sources: sources.clone(),
        inputs_used: recent.len(),
        outliers_removed: observations.len() - recent.len(),
        confidence: confidence_score(recent.len(), sources.len(), price_mean, price_stddev, mean_weight(&recent)),
        min_price: recent_prices.iter().cloned().fold(f64::INFINITY, f64::min),
        max_price: recent_prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        detail: AlgorithmDetail {
            total_volume: None,
            mean_volume: None,
            time_span_secs: None,
            price_stddev: Some(price_stddev),
        },
    })
}

fn dedup_sources(iter: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for s in iter {
        if seen.insert(s.clone()) {
            out.push(s);
        }
    }
    out
}

/// Score used to rank successful calculator runs: higher confidence wins,
/// with diminishing weight given to having more corroborating inputs.
fn rank_score(result: &AggregationResult) -> f64 {
    result.confidence * (1.0 + result.inputs_used as f64).ln()
}

fn algorithm_priority(algorithm: Algorithm) -> u8 {
    match algorithm {
        Algorithm::Vwap => 0,
        Algorithm::Twap => 1,
        Algorithm::Weighted => 2,
    }
}

/// Picks the best price among the supplied algorithm attempts. When
/// `forced` names an algorithm, that attempt's own outcome is returned
/// (success or its specific error) instead of ranking across all of them.
pub fn select_best(
    attempts: Vec<(Algorithm, EngineResult<AggregationResult>)>,
    forced: Option<Algorithm>,
) -> EngineResult<AggregatedPrice> {
    if let Some(algorithm) = forced {
        return attempts
            .into_iter()
            .find(|(a, _)| *a == algorithm)
            .ok_or_else(|| EngineError::ConfigError(format!("algorithm {algorithm} was not attempted")))
            .and_then(|(_, result)| result)
            .map(AggregatedPrice::from);
    }

    let mut failures = Vec::new();
    let mut successes = Vec::new();
    for (algorithm, result) in attempts {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => failures.push((algorithm, e)),
        }
    }

    if successes.is_empty() {
        return Err(EngineError::NoAlgorithmSucceeded(failures));
    }

    successes.sort_by(|a, b| {
        rank_score(b)
            .partial_cmp(&rank_score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| algorithm_priority(a.algorithm).cmp(&algorithm_priority(b.algorithm)))
    });

    Ok(AggregatedPrice::from(successes.remove(0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price_obs(price: f64, volume: Option<f64>, source: &str) -> Observation {
        Observation::new(
            Decimal::try_from(price).unwrap(),
            volume.map(|v| Decimal::try_from(v).unwrap()),
            source,
            1.0,
        )
    }

    #[test]
    fn vwap_weights_by_volume() {
        let config = AggregationConfig::default();
        let obs = vec![
            price_obs(10.0, Some(100.0), "okx"),
            price_obs(12.0, Some(300.0), "binance"),
        ];
        let result = vwap(&"SOL/USDC".to_string(), &obs, &config, None).unwrap();
        assert!((result.price - 11.5).abs() < 1e-9);
        assert_eq!(result.inputs_used, 2);
    }

    #[test]
    fn vwap_window_override_excludes_observations_outside_it() {
        let config = AggregationConfig::default();
        let mut stale = price_obs(10.0, Some(100.0), "okx");
        stale.recorded_at = Instant::now() - Duration::from_secs(120);
        let obs = vec![
            stale,
            price_obs(12.0, Some(100.0), "binance"),
            price_obs(11.0, Some(100.0), "coinbase"),
        ];
        // Narrowing the window below the stale observation's age drops it
        // from consideration, leaving too few points for the default
        // `min_data_points` of 3.
        assert!(matches!(
            vwap(&"SOL/USDC".to_string(), &obs, &config, Some(Duration::from_secs(60))),
            Err(EngineError::InsufficientData { available: 2, .. })
        ));
    }

    #[test]
    fn vwap_requires_volume_data() {
        let config = AggregationConfig::default();
        let obs = vec![price_obs(10.0, None, "okx"), price_obs(11.0, None, "binance")];
        assert!(matches!(vwap(&"SOL/USDC".to_string(), &obs, &config, None), Err(EngineError::NoVolumeData)));
    }

    #[test]
    fn vwap_rejects_below_min_points() {
        let config = AggregationConfig::default();
        let obs = vec![price_obs(10.0, Some(1.0), "okx")];
        assert!(matches!(
            vwap(&"SOL/USDC".to_string(), &obs, &config, None),
            Err(EngineError::InsufficientData { .. })
        ));
    }

    #[test]
    fn vwap_drops_outliers() {
        let config = AggregationConfig::default();
        let obs = vec![
            price_obs(10.0, Some(100.0), "okx"),
            price_obs(10.1, Some(100.0), "binance"),
            price_obs(9.9, Some(100.0), "coinbase"),
            price_obs(500.0, Some(100.0), "rogue"),
        ];
        let result = vwap(&"SOL/USDC".to_string(), &obs, &config, None).unwrap();
        assert_eq!(result.outliers_removed, 1);
        assert!(result.price < 15.0);
    }

    #[test]
    fn vwap_zero_surviving_volume_is_reported_as_no_volume_data() {
        // A degenerate config (min_volume of zero) lets a zero-volume
        // observation through the floor; VWAP's zero-denominator case
        // must still come back as NoVolumeData, not ZeroWeight, which is
        // reserved for TWAP/weighted.
        let mut config = AggregationConfig::default();
        config.min_volume = 0.0;
        let obs = vec![
            price_obs(10.0, Some(0.0), "okx"),
            price_obs(10.1, Some(0.0), "binance"),
            price_obs(9.9, Some(0.0), "coinbase"),
        ];
        assert!(matches!(
            vwap(&"SOL/USDC".to_string(), &obs, &config, None),
            Err(EngineError::NoVolumeData)
        ));
    }

    #[test]
    fn vwap_ignores_volume_below_floor() {
        let mut config = AggregationConfig::default();
        config.min_volume = 5.0;
        let obs = vec![
            price_obs(10.0, Some(100.0), "okx"),
            price_obs(10.1, Some(100.0), "binance"),
            price_obs(9.9, Some(0.001), "dust"),
        ];
        let result = vwap(&"SOL/USDC".to_string(), &obs, &config, None).unwrap();
        assert_eq!(result.inputs_used, 2);
    }

    #[test]
    fn twap_equal_spacing_matches_plain_mean() {
        let config = AggregationConfig::default();
        let t0 = Instant::now();
        let mut obs = vec![
            price_obs(10.0, None, "okx"),
            price_obs(11.0, None, "okx"),
            price_obs(12.0, None, "okx"),
        ];
        for (i, o) in obs.iter_mut().enumerate() {
            o.recorded_at = t0 + Duration::from_secs(i as u64);
        }
        let result = twap(&"SOL/USDC".to_string(), &obs, &config, None).unwrap();
        assert!(result.price.is_finite());
    }

    #[test]
    fn twap_fails_with_zero_weight_when_all_timestamps_match() {
        let config = AggregationConfig::default();
        let t0 = Instant::now() - Duration::from_millis(config.twap_window_ms);
        let mut obs = vec![
            price_obs(10.0, None, "okx"),
            price_obs(10.1, None, "okx"),
            price_obs(9.9, None, "okx"),
        ];
        for o in obs.iter_mut() {
            o.recorded_at = t0;
        }
        assert!(matches!(
            twap(&"SOL/USDC".to_string(), &obs, &config, None),
            Err(EngineError::ZeroWeight)
        ));
    }

    #[test]
    fn weighted_uses_each_observations_own_weight() {
        let config = AggregationConfig::default();
        let mut trusted = price_obs(10.0, None, "trusted");
        trusted.weight = 1.0;
        let mut flaky = price_obs(20.0, None, "flaky");
        flaky.weight = 0.1;
        let obs = vec![trusted, flaky];
        let result = weighted(&"SOL/USDC".to_string(), &obs, &config).unwrap();
        assert!(result.price < 15.0);
    }

    #[test]
    fn weighted_caps_at_ten_most_recent() {
        let config = AggregationConfig::default();
        let t0 = Instant::now();
        let mut obs: Vec<Observation> = (0..15)
            .map(|i| {
                let mut o = price_obs(100.0, None, "okx");
                o.recorded_at = t0 + Duration::from_secs(i);
                o
            })
            .collect();
        // Make one very old point wildly different — it must survive
        // filtering (no z-score/IQR outlier relative to the others) yet
        // still be excluded by the ten-most-recent cap.
        obs[0].price = Decimal::try_from(100.0).unwrap();

        let result = weighted(&"SOL/USDC".to_string(), &obs, &config).unwrap();
        assert_eq!(result.inputs_used, 10);
    }

    #[test]
    fn select_best_prefers_higher_confidence() {
        let low = AggregationResult {
            pair: "SOL/USDC".into(),
            algorithm: Algorithm::Twap,
            price: 10.0,
            sources: vec![],
            inputs_used: 3,
            outliers_removed: 0,
            confidence: 0.2,
            min_price: 10.0,
            max_price: 10.0,
            detail: AlgorithmDetail::default(),
        };
        let high = AggregationResult {
            algorithm: Algorithm::Vwap,
            confidence: 0.9,
            ..low.clone()
        };
        let best = select_best(vec![(Algorithm::Twap, Ok(low)), (Algorithm::Vwap, Ok(high))], None).unwrap();
        assert_eq!(best.algorithm, Algorithm::Vwap);
    }

    #[test]
    fn select_best_honors_forced_algorithm() {
        let result = AggregationResult {
            pair: "SOL/USDC".into(),
            algorithm: Algorithm::Twap,
            price: 10.0,
            sources: vec![],
            inputs_used: 3,
            outliers_removed: 0,
            confidence: 0.1,
            min_price: 10.0,
            max_price: 10.0,
            detail: AlgorithmDetail::default(),
        };
        let best = select_best(vec![(Algorithm::Twap, Ok(result))], Some(Algorithm::Twap)).unwrap();
        assert_eq!(best.algorithm, Algorithm::Twap);
    }

    #[test]
    fn select_best_fails_when_every_algorithm_fails() {
        let attempts = vec![
            (Algorithm::Vwap, Err(EngineError::NoVolumeData)),
            (Algorithm::Twap, Err(EngineError::AllOutliers)),
        ];
        assert!(matches!(select_best(attempts, None), Err(EngineError::NoAlgorithmSucceeded(_))));
    }
}
