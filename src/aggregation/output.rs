//! Columnar form of the county-year aggregate table.

use crate::types::records::CountyYearAggregate;
use log::info;
use polars::prelude::*;
use std::collections::BTreeMap;

/// Columns every aggregate table must carry.
pub const AGGREGATE_COLUMNS: [&str; 8] = [
    "county_fips",
    "year",
    "region",
    "flood_days",
    "missing_days",
    "n_stations",
    "n_reference_points",
    "completeness",
];

pub fn aggregates_to_frame(aggregates: &[CountyYearAggregate]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Column::new(
            "county_fips".into(),
            aggregates.iter().map(|a| a.county_fips.as_str()).collect::<Vec<_>>(),
        ),
        Column::new("year".into(), aggregates.iter().map(|a| a.year).collect::<Vec<_>>()),
        Column::new(
            "region".into(),
            aggregates.iter().map(|a| a.region.as_str()).collect::<Vec<_>>(),
        ),
        Column::new(
            "flood_days".into(),
            aggregates.iter().map(|a| a.flood_days).collect::<Vec<_>>(),
        ),
        Column::new(
            "missing_days".into(),
            aggregates.iter().map(|a| a.missing_days).collect::<Vec<_>>(),
        ),
        Column::new(
            "n_stations".into(),
            aggregates.iter().map(|a| a.n_stations).collect::<Vec<_>>(),
        ),
        Column::new(
            "n_reference_points".into(),
            aggregates.iter().map(|a| a.n_reference_points).collect::<Vec<_>>(),
        ),
        Column::new(
            "completeness".into(),
            aggregates.iter().map(|a| a.completeness).collect::<Vec<_>>(),
        ),
    ])
}

pub fn aggregates_from_frame(df: &DataFrame) -> PolarsResult<Vec<CountyYearAggregate>> {
    let county = df.column("county_fips")?.str()?;
    let year = df.column("year")?.cast(&DataType::Int32)?;
    let year = year.i32()?;
    let region = df.column("region")?.str()?;
    let flood_days = df.column("flood_days")?.f64()?;
    let missing_days = df.column("missing_days")?.f64()?;
    let n_stations = df.column("n_stations")?.cast(&DataType::UInt32)?;
    let n_stations = n_stations.u32()?;
    let n_points = df.column("n_reference_points")?.cast(&DataType::UInt32)?;
    let n_points = n_points.u32()?;
    let completeness = df.column("completeness")?.f64()?;

    Ok((0..df.height())
        .filter_map(|i| {
            Some(CountyYearAggregate {
                county_fips: county.get(i)?.to_string(),
                year: year.get(i)?,
                region: region.get(i).unwrap_or_default().to_string(),
                flood_days: flood_days.get(i),
                missing_days: missing_days.get(i),
                n_stations: n_stations.get(i).unwrap_or(0),
                n_reference_points: n_points.get(i).unwrap_or(0),
                completeness: completeness.get(i).unwrap_or(0.0),
            })
        })
        .collect())
}

/// Per-region summary of one stage's aggregates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionSummary {
    pub counties: usize,
    pub county_years: usize,
    pub county_years_with_data: usize,
    pub mean_flood_days: Option<f64>,
    pub max_flood_days: Option<f64>,
}

pub fn summarize_regions(aggregates: &[CountyYearAggregate]) -> BTreeMap<String, RegionSummary> {
    let mut counties: BTreeMap<&str, std::collections::BTreeSet<&str>> = BTreeMap::new();
    let mut sums: BTreeMap<&str, (usize, usize, f64, Option<f64>)> = BTreeMap::new();
    for a in aggregates {
        counties.entry(&a.region).or_default().insert(&a.county_fips);
        let entry = sums.entry(&a.region).or_insert((0, 0, 0.0, None));
        entry.0 += 1;
        if let Some(v) = a.flood_days {
            entry.1 += 1;
            entry.2 += v;
            entry.3 = Some(entry.3.map_or(v, |m: f64| m.max(v)));
        }
    }

    sums.into_iter()
        .map(|(region, (rows, with_data, total, max))| {
            (
                region.to_string(),
                RegionSummary {
                    counties: counties.get(region).map(|c| c.len()).unwrap_or(0),
                    county_years: rows,
                    county_years_with_data: with_data,
                    mean_flood_days: (with_data > 0).then(|| total / with_data as f64),
                    max_flood_days: max,
                },
            )
        })
        .collect()
}

pub fn log_region_summary(stage: &str, aggregates: &[CountyYearAggregate]) {
    for (region, summary) in summarize_regions(aggregates) {
        info!(
            "[{}] {}: {} counties, {}/{} county-years with data, mean flood days {}, max {}",
            stage,
            region,
            summary.counties,
            summary.county_years_with_data,
            summary.county_years,
            summary
                .mean_flood_days
                .map(|v| format!("{v:.2}"))
                .unwrap_or_else(|| "n/a".to_string()),
            summary
                .max_flood_days
                .map(|v| format!("{v:.2}"))
                .unwrap_or_else(|| "n/a".to_string()),
        );
    }
}
