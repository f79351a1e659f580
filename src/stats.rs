use anyhow::{Context, Result};
use diffusion_common::{GenerationCensus, StatsFormat};
use log::info;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Keeps one census per painted generation and writes the series at end of run.
#[derive(Debug)]
pub struct CensusRecorder {
    data_root: PathBuf,
    format: StatsFormat,
    name: String,
    series: Vec<GenerationCensus>,
}

impl CensusRecorder {
    pub fn new(data_root: impl Into<PathBuf>, format: StatsFormat) -> Self {
        CensusRecorder {
            data_root: data_root.into(),
            format,
            name: String::from("model"),
            series: Vec::new(),
        }
    }

    /// Starts a fresh series for `model_name`.
    pub fn begin(&mut self, model_name: &str) {
        self.name = model_name.to_string();
        self.series.clear();
    }

    pub fn record(&mut self, generation: u64, counts: &[(&'static str, u32)]) {
        self.series.push(GenerationCensus::new(generation, counts));
    }

    #[cfg(test)]
    pub fn series(&self) -> &[GenerationCensus] {
        &self.series
    }

    pub fn output_path(&self) -> PathBuf {
        let ext = match self.format {
            StatsFormat::Json => "json",
            StatsFormat::Bincode => "bin",
            StatsFormat::Messagepack => "msgpack",
            StatsFormat::Csv => "csv",
        };
        self.data_root.join(format!("{}_census.{}", self.name, ext))
    }

    /// Writes the series recorded so far. Returns the path written, or `None` when
    /// nothing was recorded.
    pub fn save(&self) -> Result<Option<PathBuf>> {
        if self.series.is_empty() {
            return Ok(None);
        }
        fs::create_dir_all(&self.data_root)
            .with_context(|| format!("Failed to create data directory '{}'", self.data_root.display()))?;

        let path = self.output_path();
        let file = File::create(&path).with_context(|| format!("Failed to create census file '{}'", path.display()))?;
        let mut writer = BufWriter::new(file);

        match self.format {
            StatsFormat::Json => {
                serde_json::to_writer(&mut writer, &self.series).context("Error serializing census to JSON")?;
            }
            StatsFormat::Bincode => {
                bincode::serialize_into(&mut writer, &self.series).context("Error serializing census to bincode")?;
            }
            StatsFormat::Messagepack => {
                rmp_serde::encode::write(&mut writer, &self.series)
                    .context("Error serializing census to MessagePack")?;
            }
            StatsFormat::Csv => write_csv(&mut writer, &self.series)?,
        }
        writer.flush()?;

        info!(
            "Census of {} generations saved to {} ({:?} format)",
            self.series.len(),
            path.display(),
            self.format
        );
        Ok(Some(path))
    }
}

/// One row per generation, one column per state label.
fn write_csv<W: Write>(writer: W, series: &[GenerationCensus]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = vec!["generation".to_string()];
    if let Some(first) = series.first() {
        header.extend(first.counts.iter().map(|(label, _)| label.clone()));
    }
    csv_writer.write_record(&header)?;

    for census in series {
        let mut row = vec![census.generation.to_string()];
        row.extend(census.counts.iter().map(|(_, n)| n.to_string()));
        csv_writer.write_record(&row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("diffusion-stats-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn recorder(dir: &Path, format: StatsFormat) -> CensusRecorder {
        let mut recorder = CensusRecorder::new(dir, format);
        recorder.begin("SIRModel");
        recorder.record(0, &[("Susceptible", 8), ("Infected", 1), ("Removed", 0)]);
        recorder.record(1, &[("Susceptible", 4), ("Infected", 4), ("Removed", 1)]);
        recorder
    }

    #[test]
    fn json_series_can_be_read_back() {
        let dir = scratch_dir("json");
        let recorder = recorder(&dir, StatsFormat::Json);
        let path = recorder.save().unwrap().unwrap();
        assert_eq!(path, dir.join("SIRModel_census.json"));

        let series: Vec<GenerationCensus> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(series, recorder.series());
        assert_eq!(series[1].count("Removed"), 1);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn csv_has_a_column_per_state() {
        let dir = scratch_dir("csv");
        let path = recorder(&dir, StatsFormat::Csv).save().unwrap().unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["generation,Susceptible,Infected,Removed", "0,8,1,0", "1,4,4,1"]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn binary_formats_decode() {
        let dir = scratch_dir("binary");

        let path = recorder(&dir, StatsFormat::Bincode).save().unwrap().unwrap();
        let bytes = fs::read(&path).unwrap();
        let series: Vec<GenerationCensus> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(series.len(), 2);

        let path = recorder(&dir, StatsFormat::Messagepack).save().unwrap().unwrap();
        assert!(path.to_string_lossy().ends_with(".msgpack"));
        let bytes = fs::read(&path).unwrap();
        let series: Vec<GenerationCensus> = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(series[0].total(), 9);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn begin_starts_a_new_series() {
        let dir = scratch_dir("begin");
        let mut recorder = recorder(&dir, StatsFormat::Json);
        recorder.begin("SISModel");
        assert!(recorder.series().is_empty());
        assert!(recorder.save().unwrap().is_none());
        assert_eq!(recorder.output_path(), dir.join("SISModel_census.json"));
    }
}
