//! Global checks on a finished aggregate table.

use crate::aggregation::error::ValidationError;
use crate::aggregation::output::AGGREGATE_COLUMNS;
use polars::prelude::*;

/// Fails if required columns are missing or a (county_fips, year) key repeats.
pub fn validate_aggregates(df: &DataFrame) -> Result<(), ValidationError> {
    let present = df.get_column_names();
    let missing: Vec<String> = AGGREGATE_COLUMNS
        .iter()
        .filter(|name| !present.iter().any(|p| p.as_str() == **name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingColumns(missing));
    }

    let duplicates = df
        .clone()
        .lazy()
        .group_by([col("county_fips"), col("year")])
        .agg([len().alias("rows")])
        .filter(col("rows").gt(lit(1)))
        .sort(["county_fips", "year"], Default::default())
        .collect()?;
    if duplicates.height() == 0 {
        return Ok(());
    }

    let county = duplicates.column("county_fips")?.str()?;
    let year = duplicates.column("year")?.cast(&DataType::Int32)?;
    let year = year.i32()?;
    let keys: Vec<(String, i32)> = county
        .into_iter()
        .zip(year.into_iter())
        .filter_map(|(c, y)| Some((c?.to_string(), y?)))
        .collect();
    Err(ValidationError::DuplicateKeys {
        count: keys.len(),
        keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::output::aggregates_to_frame;
    use crate::types::records::CountyYearAggregate;

    fn aggregate(fips: &str, year: i32) -> CountyYearAggregate {
        CountyYearAggregate {
            county_fips: fips.to_string(),
            year,
            region: "gulf_coast".to_string(),
            flood_days: Some(1.0),
            missing_days: Some(0.0),
            n_stations: 1,
            n_reference_points: 1,
            completeness: 1.0,
        }
    }

    #[test]
    fn test_unique_keys_pass() {
        let df = aggregates_to_frame(&[aggregate("48167", 2020), aggregate("48167", 2021)]).unwrap();
        assert!(validate_aggregates(&df).is_ok());
    }

    #[test]
    fn test_duplicate_keys_reported() {
        let df = aggregates_to_frame(&[
            aggregate("48167", 2020),
            aggregate("48167", 2020),
            aggregate("48071", 2020),
        ])
        .unwrap();
        match validate_aggregates(&df) {
            Err(ValidationError::DuplicateKeys { count, keys }) => {
                assert_eq!(count, 1);
                assert_eq!(keys, vec![("48167".to_string(), 2020)]);
            }
            other => panic!("expected duplicate key error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_columns_reported() {
        let df = aggregates_to_frame(&[aggregate("48167", 2020)])
            .unwrap()
            .drop("completeness")
            .unwrap();
        match validate_aggregates(&df) {
            Err(ValidationError::MissingColumns(columns)) => {
                assert_eq!(columns, vec!["completeness".to_string()])
            }
            other => panic!("expected missing column error, got {:?}", other),
        }
    }
}
