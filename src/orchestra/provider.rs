use std::{fs, path::Path};

use crate::orchestra::{
    config::INPUT_UNITS,
    error::{PipelineError, Result, Site},
    worker::WeightMatrix,
};

/// Supplies the weight matrix of every stage.
pub trait WeightProvider {
    /// Should return `units` rows for the stage at `stage`.
    ///
    /// # Arguments
    /// * `stage` - The stage position, `0` being the input stage.
    /// * `units` - The amount of rows expected.
    fn weights(&self, stage: usize, units: usize) -> Result<WeightMatrix>;
}

/// Supplies the input vector of the first pass.
pub trait InputProvider {
    fn initial_input(&self) -> Result<Vec<f64>>;
}

impl InputProvider for Vec<f64> {
    fn initial_input(&self) -> Result<Vec<f64>> {
        Ok(self.clone())
    }
}

impl InputProvider for [f64] {
    fn initial_input(&self) -> Result<Vec<f64>> {
        Ok(self.to_vec())
    }
}

/// Weight matrices held in memory, one per stage.
#[derive(Debug, Clone, Default)]
pub struct InlineWeights {
    matrices: Vec<WeightMatrix>,
}

impl InlineWeights {
    pub fn new(matrices: Vec<WeightMatrix>) -> Self {
        Self { matrices }
    }
}

impl WeightProvider for InlineWeights {
    fn weights(&self, stage: usize, _units: usize) -> Result<WeightMatrix> {
        self.matrices.get(stage).cloned().ok_or_else(|| {
            PipelineError::invalid(Site::Stage(stage), "no weight matrix for this stage")
        })
    }
}

/// The plain text weights file.
///
/// The first line holds the initial input vector, every following line one
/// weight row: the input stage rows first, then each hidden stage, then the
/// output stage. Values are separated by commas and/or whitespace.
///
/// Blank lines are skipped before rows are counted, so an empty line between
/// rows doesn't shift the rows of the stages after it.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightFile {
    input: Vec<f64>,
    rows: Vec<Vec<f64>>,
}

impl WeightFile {
    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if the file can't be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::invalid(Site::Setup, format!("cannot read '{}': {e}", path.display()))
        })?;

        Self::parse(&content)
    }

    /// Parses the weights file format, blank lines are skipped.
    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| parse_line(n + 1, line));

        let input = lines
            .next()
            .ok_or_else(|| PipelineError::invalid(Site::Setup, "missing the input vector line"))??;
        let rows = lines.collect::<Result<Vec<_>>>()?;

        Ok(Self { input, rows })
    }

    /// The amount of weight rows in the file.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn row_offset(stage: usize, units: usize) -> usize {
        match stage {
            0 => 0,
            _ => INPUT_UNITS + (stage - 1) * units,
        }
    }
}

impl InputProvider for WeightFile {
    fn initial_input(&self) -> Result<Vec<f64>> {
        Ok(self.input.clone())
    }
}

impl WeightProvider for WeightFile {
    fn weights(&self, stage: usize, units: usize) -> Result<WeightMatrix> {
        let start = Self::row_offset(stage, units);
        let end = start + units;

        match self.rows.get(start..end) {
            Some(rows) => Ok(rows.to_vec()),
            None => Err(PipelineError::invalid(
                Site::Stage(stage),
                format!(
                    "missing weight rows: needs rows {start}..{end} but the file has {}",
                    self.rows.len()
                ),
            )),
        }
    }
}

fn parse_line(line_no: usize, line: &str) -> Result<Vec<f64>> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                PipelineError::invalid(
                    Site::Setup,
                    format!("line {line_no}: '{token}' is not a number"),
                )
            })
        })
        .collect()
}
