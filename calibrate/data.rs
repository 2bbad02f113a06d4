//! # Data Loading and Alignment
//!
//! Reads delimited PRS and PC tables with `polars`, validates them, and
//! aligns the two by an explicit sample-ID column before anything reaches the
//! calibration core.
//!
//! - Alignment is by key, never by row position. A sample present in one
//!   table but not the other is an error, as is a repeated ID.
//! - Rows come out in PRS-table order.
//! - Failures are assumed to be user-input errors; `DataError` says which
//!   file and column is at fault.

use ahash::AHashMap;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Explicit I/O configuration. Nothing in the calibration core reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataConfig {
    pub separator: u8,
    pub id_column: String,
    pub score_column: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            separator: b'\t',
            id_column: "sample_id".to_string(),
            score_column: "PRS".to_string(),
        }
    }
}

/// Which columns of the PC table are ancestry covariates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PcSelection {
    /// Every column except the ID column, in file order.
    All,
    /// `PC1` through `PCn`.
    First(usize),
    /// Exactly these columns, in this order.
    Named(Vec<String>),
}

/// PRS values and covariates aligned by sample ID.
#[derive(Debug)]
pub struct CalibrationInputs {
    pub sample_ids: Vec<String>,
    pub prs: Array1<f64>,
    /// Shape: [n_samples, pc_names.len()].
    pub pcs: Array2<f64>,
    pub pc_names: Vec<String>,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The required column '{column}' was not found in '{file}'. Please check spelling and case.")]
    ColumnNotFound { file: String, column: String },
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("Missing or null values were found in the required column '{0}'.")]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in the required column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error("Sample ID '{id}' appears more than once in '{file}'.")]
    DuplicateSampleId { file: String, id: String },
    #[error("{count} sample(s) in '{file}' have no match in the other table (e.g. {examples}).")]
    UnmatchedSamples {
        file: String,
        count: usize,
        examples: String,
    },
    #[error("'{0}' has no covariate columns besides the sample ID.")]
    NoCovariateColumns(String),
}

/// Loads the PRS and PC tables and aligns them by sample ID.
pub fn load_calibration_inputs(
    prs_path: &str,
    pc_path: &str,
    config: &DataConfig,
    selection: &PcSelection,
) -> Result<CalibrationInputs, DataError> {
    let prs_df = internal::read_table(prs_path, config.separator, &config.id_column)?;
    internal::require_columns(&prs_df, prs_path, &[&config.id_column, &config.score_column])?;
    let prs_ids = internal::extract_id_column(&prs_df, &config.id_column)?;
    let prs_values = internal::extract_numeric_column(&prs_df, &config.score_column)?;

    let pc_df = internal::read_table(pc_path, config.separator, &config.id_column)?;
    internal::require_columns(&pc_df, pc_path, &[&config.id_column])?;
    let pc_names = internal::resolve_pc_names(&pc_df, pc_path, &config.id_column, selection)?;
    let pc_ids = internal::extract_id_column(&pc_df, &config.id_column)?;
    let pc_columns = pc_names
        .iter()
        .map(|name| internal::extract_numeric_column(&pc_df, name))
        .collect::<Result<Vec<_>, _>>()?;

    let order = internal::align_by_id(&prs_ids, prs_path, &pc_ids, pc_path)?;
    log::info!(
        "Aligned {} samples across '{}' and '{}' using {} covariates.",
        order.len(),
        prs_path,
        pc_path,
        pc_names.len()
    );

    let prs = Array1::from_vec(prs_values);
    let mut pcs = Array2::zeros((order.len(), pc_names.len()));
    for (row, &pc_row) in order.iter().enumerate() {
        for (col, values) in pc_columns.iter().enumerate() {
            pcs[[row, col]] = values[pc_row];
        }
    }

    Ok(CalibrationInputs {
        sample_ids: prs_ids,
        prs,
        pcs,
        pc_names,
    })
}

/// Reads any delimited table with a header row. The configured ID column,
/// if present, is kept as text.
pub fn load_table(path: &str, config: &DataConfig) -> Result<DataFrame, DataError> {
    internal::read_table(path, config.separator, &config.id_column)
}

/// Writes `df` as a delimited table with a header row.
pub fn write_table(df: &mut DataFrame, path: &str, config: &DataConfig) -> Result<(), DataError> {
    let mut file = File::create(Path::new(path))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(config.separator)
        .finish(df)?;
    Ok(())
}

/// Builds the `sample_id` / `z_score` result table.
pub fn z_score_frame(
    sample_ids: &[String],
    z_scores: ArrayView1<'_, f64>,
    config: &DataConfig,
    z_column: &str,
) -> Result<DataFrame, DataError> {
    let df = DataFrame::new(vec![
        Column::new(config.id_column.as_str().into(), sample_ids.to_vec()),
        Column::new(z_column.into(), z_scores.to_vec()),
    ])?;
    Ok(df)
}

/// Internal module for shared loading logic.
mod internal {
    use super::*;

    fn read_options(separator: u8) -> CsvReadOptions {
        CsvReadOptions::default()
            .with_has_header(true)
            .with_parse_options(CsvParseOptions::default().with_separator(separator))
    }

    /// Reads a delimited table. When the header names `id_column`, that column
    /// is read verbatim as text so IDs such as `001` or `1.10` survive.
    pub(super) fn read_table(
        path: &str,
        separator: u8,
        id_column: &str,
    ) -> Result<DataFrame, DataError> {
        log::debug!("Loading table from '{path}'");
        let header = CsvReader::new(File::open(Path::new(path))?)
            .with_options(read_options(separator).with_n_rows(Some(1)))
            .finish()?;
        let has_id = header
            .get_column_names()
            .iter()
            .any(|name| name.as_str() == id_column);

        let mut options = read_options(separator);
        if has_id {
            let overwrite = Schema::from_iter([(PlSmallStr::from(id_column), DataType::String)]);
            options = options.with_schema_overwrite(Some(Arc::new(overwrite)));
        }
        let df = CsvReader::new(File::open(Path::new(path))?)
            .with_options(options)
            .finish()?;
        log::debug!("Loaded {} rows x {} columns from '{path}'", df.height(), df.width());
        Ok(df)
    }

    pub(super) fn column_names(df: &DataFrame) -> Vec<String> {
        df.get_column_names().iter().map(|s| s.to_string()).collect()
    }

    pub(super) fn require_columns(df: &DataFrame, path: &str, required: &[&String]) -> Result<(), DataError> {
        let present: HashSet<String> = column_names(df).into_iter().collect();
        for column in required {
            if !present.contains(column.as_str()) {
                return Err(DataError::ColumnNotFound {
                    file: path.to_string(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    pub(super) fn resolve_pc_names(
        df: &DataFrame,
        path: &str,
        id_column: &str,
        selection: &PcSelection,
    ) -> Result<Vec<String>, DataError> {
        let names = match selection {
            PcSelection::All => column_names(df)
                .into_iter()
                .filter(|name| name != id_column)
                .collect::<Vec<_>>(),
            PcSelection::First(n) => (1..=*n).map(|i| format!("PC{i}")).collect(),
            PcSelection::Named(names) => names.clone(),
        };
        if names.is_empty() && matches!(selection, PcSelection::All) {
            return Err(DataError::NoCovariateColumns(path.to_string()));
        }
        let refs: Vec<&String> = names.iter().collect();
        require_columns(df, path, &refs)?;
        Ok(names)
    }

    pub(super) fn extract_id_column(df: &DataFrame, column_name: &str) -> Result<Vec<String>, DataError> {
        let column = df.column(column_name)?;
        if column.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }
        let casted = column.cast(&DataType::String)?;
        let ids = casted
            .str()?
            .into_iter()
            .map(|value| value.map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| DataError::MissingValuesFound(column_name.to_string()))?;
        Ok(ids)
    }

    pub(super) fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
        let column = df.column(column_name)?;
        if column.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }

        let wrong_type = || DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", column.dtype()),
        };
        if !column.dtype().is_primitive_numeric() {
            return Err(wrong_type());
        }
        let casted = column.cast(&DataType::Float64).map_err(|_| wrong_type())?;
        if casted.null_count() > 0 {
            return Err(wrong_type());
        }

        let values: Vec<f64> = casted.f64()?.into_no_null_iter().collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
        }
        Ok(values)
    }

    fn index_ids<'a>(ids: &'a [String], path: &str) -> Result<AHashMap<&'a str, usize>, DataError> {
        let mut index = AHashMap::with_capacity(ids.len());
        for (row, id) in ids.iter().enumerate() {
            if index.insert(id.as_str(), row).is_some() {
                return Err(DataError::DuplicateSampleId {
                    file: path.to_string(),
                    id: id.clone(),
                });
            }
        }
        Ok(index)
    }

    fn unmatched_error(missing: &[&str], path: &str) -> DataError {
        DataError::UnmatchedSamples {
            file: path.to_string(),
            count: missing.len(),
            examples: missing.iter().take(5).join(", "),
        }
    }

    /// For each PRS row, the matching PC row.
    pub(super) fn align_by_id(
        prs_ids: &[String],
        prs_path: &str,
        pc_ids: &[String],
        pc_path: &str,
    ) -> Result<Vec<usize>, DataError> {
        let prs_index = index_ids(prs_ids, prs_path)?;
        let pc_index = index_ids(pc_ids, pc_path)?;

        let missing_in_pcs: Vec<&str> = prs_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !pc_index.contains_key(id))
            .collect();
        if !missing_in_pcs.is_empty() {
            return Err(unmatched_error(&missing_in_pcs, prs_path));
        }
        let missing_in_prs: Vec<&str> = pc_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !prs_index.contains_key(id))
            .collect();
        if !missing_in_prs.is_empty() {
            return Err(unmatched_error(&missing_in_prs, pc_path));
        }

        Ok(prs_ids.iter().map(|id| pc_index[id.as_str()]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", content).unwrap();
        file.flush().unwrap();
        file
    }

    fn path_of(file: &NamedTempFile) -> &str {
        file.path().to_str().unwrap()
    }

    #[test]
    fn aligns_rows_by_sample_id_not_position() {
        let prs = create_test_file("sample_id\tPRS\nA\t1.0\nB\t2.0\nC\t3.0");
        let pcs = create_test_file("sample_id\tPC1\tPC2\nC\t0.3\t-3.0\nA\t0.1\t-1.0\nB\t0.2\t-2.0");
        let inputs = load_calibration_inputs(
            path_of(&prs),
            path_of(&pcs),
            &DataConfig::default(),
            &PcSelection::All,
        )
        .unwrap();

        assert_eq!(inputs.sample_ids, vec!["A", "B", "C"]);
        assert_eq!(inputs.pc_names, vec!["PC1", "PC2"]);
        assert_eq!(inputs.pcs.shape(), &[3, 2]);
        assert_abs_diff_eq!(inputs.prs[2], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(inputs.pcs[[0, 0]], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(inputs.pcs[[2, 1]], -3.0, epsilon = 1e-12);
    }

    #[test]
    fn numeric_ids_are_matched_as_strings() {
        let prs = create_test_file("sample_id\tPRS\n101\t1.0\n102\t2.0");
        let pcs = create_test_file("sample_id\tPC1\n102\t0.2\n101\t0.1");
        let inputs = load_calibration_inputs(
            path_of(&prs),
            path_of(&pcs),
            &DataConfig::default(),
            &PcSelection::All,
        )
        .unwrap();
        assert_eq!(inputs.sample_ids, vec!["101", "102"]);
        assert_abs_diff_eq!(inputs.pcs[[0, 0]], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn ids_with_leading_zeros_are_kept_verbatim() {
        let prs = create_test_file("sample_id\tPRS\n001\t1.0\n002\t2.0");
        let pcs = create_test_file("sample_id\tPC1\n002\t0.2\n001\t0.1");
        let inputs = load_calibration_inputs(
            path_of(&prs),
            path_of(&pcs),
            &DataConfig::default(),
            &PcSelection::All,
        )
        .unwrap();
        assert_eq!(inputs.sample_ids, vec!["001", "002"]);
        assert_abs_diff_eq!(inputs.pcs[[1, 0]], 0.2, epsilon = 1e-12);

        let config = DataConfig::default();
        let mut df =
            z_score_frame(&inputs.sample_ids, inputs.prs.view(), &config, "z_score").unwrap();
        let out = NamedTempFile::new().unwrap();
        write_table(&mut df, path_of(&out), &config).unwrap();
        let back = load_table(path_of(&out), &config).unwrap();
        let ids: Vec<&str> = back
            .column("sample_id")
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(ids, vec!["001", "002"]);
    }

    #[test]
    fn decimal_looking_ids_stay_distinct() {
        let prs = create_test_file("sample_id\tPRS\n1.10\t1.0\n1.1\t2.0");
        let pcs = create_test_file("sample_id\tPC1\n1.1\t0.2\n1.10\t0.1");
        let inputs = load_calibration_inputs(
            path_of(&prs),
            path_of(&pcs),
            &DataConfig::default(),
            &PcSelection::All,
        )
        .unwrap();
        assert_eq!(inputs.sample_ids, vec!["1.10", "1.1"]);
        assert_abs_diff_eq!(inputs.pcs[[0, 0]], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(inputs.pcs[[1, 0]], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn single_column_table_without_id_keeps_its_name() {
        let file = create_test_file("z_score\n0.5\n-1.0");
        let df = load_table(path_of(&file), &DataConfig::default()).unwrap();
        assert_eq!(internal::column_names(&df), vec!["z_score".to_string()]);
        assert!(df.column("z_score").unwrap().dtype().is_primitive_numeric());
    }

    #[test]
    fn unmatched_samples_fail_loudly() {
        let prs = create_test_file("sample_id\tPRS\nA\t1.0\nB\t2.0");
        let pcs = create_test_file("sample_id\tPC1\nA\t0.1\nZ\t0.9");
        let err = load_calibration_inputs(
            path_of(&prs),
            path_of(&pcs),
            &DataConfig::default(),
            &PcSelection::All,
        )
        .unwrap_err();
        match err {
            DataError::UnmatchedSamples { count, examples, .. } => {
                assert_eq!(count, 1);
                assert_eq!(examples, "B");
            }
            other => panic!("Expected UnmatchedSamples, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let prs = create_test_file("sample_id\tPRS\nA\t1.0\nA\t2.0");
        let pcs = create_test_file("sample_id\tPC1\nA\t0.1");
        let err = load_calibration_inputs(
            path_of(&prs),
            path_of(&pcs),
            &DataConfig::default(),
            &PcSelection::All,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::DuplicateSampleId { id, .. } if id == "A"));
    }

    #[test]
    fn first_n_selection_requires_named_pcs() {
        let prs = create_test_file("sample_id\tPRS\nA\t1.0");
        let pcs = create_test_file("sample_id\tPC1\textra\nA\t0.1\t5.0");
        let inputs = load_calibration_inputs(
            path_of(&prs),
            path_of(&pcs),
            &DataConfig::default(),
            &PcSelection::First(1),
        )
        .unwrap();
        assert_eq!(inputs.pc_names, vec!["PC1"]);

        let err = load_calibration_inputs(
            path_of(&prs),
            path_of(&pcs),
            &DataConfig::default(),
            &PcSelection::First(2),
        )
        .unwrap_err();
        assert!(matches!(err, DataError::ColumnNotFound { column, .. } if column == "PC2"));
    }

    #[test]
    fn missing_score_column_is_reported() {
        let prs = create_test_file("sample_id\tscore\nA\t1.0");
        let pcs = create_test_file("sample_id\tPC1\nA\t0.1");
        let err = load_calibration_inputs(
            path_of(&prs),
            path_of(&pcs),
            &DataConfig::default(),
            &PcSelection::All,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::ColumnNotFound { column, .. } if column == "PRS"));
    }

    #[test]
    fn non_numeric_and_missing_values_are_rejected() {
        let pcs = create_test_file("sample_id\tPC1\nA\t0.1\nB\t0.2");

        let prs = create_test_file("sample_id\tPRS\nA\tabc\nB\t2.0");
        let err = load_calibration_inputs(
            path_of(&prs),
            path_of(&pcs),
            &DataConfig::default(),
            &PcSelection::All,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::ColumnWrongType { column_name, .. } if column_name == "PRS"));

        let prs = create_test_file("sample_id\tPRS\nA\t\nB\t2.0");
        let err = load_calibration_inputs(
            path_of(&prs),
            path_of(&pcs),
            &DataConfig::default(),
            &PcSelection::All,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::MissingValuesFound(column) if column == "PRS"));
    }

    #[test]
    fn comma_separated_input_with_custom_columns() {
        let config = DataConfig {
            separator: b',',
            id_column: "IID".to_string(),
            score_column: "score".to_string(),
        };
        let prs = create_test_file("IID,score\nx,0.5\ny,1.5");
        let pcs = create_test_file("IID,PC1\ny,2.0\nx,1.0");
        let inputs =
            load_calibration_inputs(path_of(&prs), path_of(&pcs), &config, &PcSelection::All)
                .unwrap();
        assert_abs_diff_eq!(inputs.pcs[[1, 0]], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn z_score_table_roundtrips_through_disk() {
        let config = DataConfig::default();
        let ids = vec!["A".to_string(), "B".to_string()];
        let z = Array1::from_vec(vec![-0.5, 1.25]);
        let mut df = z_score_frame(&ids, z.view(), &config, "z_score").unwrap();
        let out = NamedTempFile::new().unwrap();
        write_table(&mut df, path_of(&out), &config).unwrap();

        let back = load_table(path_of(&out), &config).unwrap();
        assert_eq!(back.height(), 2);
        let values: Vec<f64> = back
            .column("z_score")
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(values, vec![-0.5, 1.25]);
    }
}
