//! Parquet track-table reading and writing.
//!
//! The input schema is fixed: per-track columns `pt_signed`, `eta`,
//! `tpc_inner_param`, `tpc_signal`, `beta`, `dca_xy`, `dca_z`,
//! `tpc_clusters`, `its_cluster_map`, `flags`, plus `gen_pt`, `gen_eta`
//! and `pdg_code` for simulated samples. A missing column is a fail-fast
//! input error naming the column; numeric columns of any width are
//! accepted and converted.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int32Array, UInt16Array, UInt32Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use hx_core::{McTruth, TrackRecord};

use crate::error::{IoError, Result};

/// An in-memory table of track records.
#[derive(Debug, Clone, Default)]
pub struct TrackTable {
    tracks: Vec<TrackRecord>,
}

impl TrackTable {
    /// Build a table from records (tests and skim export).
    pub fn from_records(tracks: Vec<TrackRecord>) -> Self {
        Self { tracks }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Iterate over the rows.
    pub fn iter(&self) -> std::slice::Iter<'_, TrackRecord> {
        self.tracks.iter()
    }

    /// Row slice.
    pub fn records(&self) -> &[TrackRecord] {
        &self.tracks
    }
}

impl<'a> IntoIterator for &'a TrackTable {
    type Item = &'a TrackRecord;
    type IntoIter = std::slice::Iter<'a, TrackRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.iter()
    }
}

fn column_f64(batch: &RecordBatch, name: &str) -> Result<Vec<f64>> {
    let col = batch
        .column_by_name(name)
        .ok_or_else(|| IoError::MissingColumn(name.to_string()))?;
    let casted: ArrayRef = cast(col, &DataType::Float64).map_err(|_| IoError::WrongType {
        col: name.to_string(),
        actual: col.data_type().to_string(),
    })?;
    let arr = casted
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| IoError::WrongType {
            col: name.to_string(),
            actual: col.data_type().to_string(),
        })?;
    Ok(arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// Read a track table, requiring the MC truth columns when `is_mc` is set.
pub fn read_tracks(path: impl AsRef<Path>, is_mc: bool) -> Result<TrackTable> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        IoError::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))
    })?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut tracks = Vec::new();
    for batch in reader {
        let batch = batch?;
        let pt_signed = column_f64(&batch, "pt_signed")?;
        let eta = column_f64(&batch, "eta")?;
        let tpc_inner_param = column_f64(&batch, "tpc_inner_param")?;
        let tpc_signal = column_f64(&batch, "tpc_signal")?;
        let beta = column_f64(&batch, "beta")?;
        let dca_xy = column_f64(&batch, "dca_xy")?;
        let dca_z = column_f64(&batch, "dca_z")?;
        let tpc_clusters = column_f64(&batch, "tpc_clusters")?;
        let its_cluster_map = column_f64(&batch, "its_cluster_map")?;
        let flags = column_f64(&batch, "flags")?;
        let mc_cols = if is_mc {
            Some((
                column_f64(&batch, "gen_pt")?,
                column_f64(&batch, "gen_eta")?,
                column_f64(&batch, "pdg_code")?,
            ))
        } else {
            None
        };

        tracks.reserve(batch.num_rows());
        for i in 0..batch.num_rows() {
            let mc = mc_cols.as_ref().map(|(gen_pt, gen_eta, pdg)| McTruth {
                gen_pt: gen_pt[i],
                gen_eta: gen_eta[i],
                pdg_code: pdg[i] as i32,
            });
            tracks.push(TrackRecord {
                pt_signed: pt_signed[i],
                eta: eta[i],
                tpc_inner_param: tpc_inner_param[i],
                tpc_signal: tpc_signal[i],
                beta: beta[i],
                dca_xy: dca_xy[i],
                dca_z: dca_z[i],
                tpc_clusters: tpc_clusters[i] as u16,
                its_cluster_map: its_cluster_map[i] as u32,
                flags: flags[i] as u32,
                mc,
            });
        }
    }
    tracing::debug!(rows = tracks.len(), path = %path.display(), "track table read");
    Ok(TrackTable { tracks })
}

/// Write a track table (skim export). MC truth columns are written only if
/// every record carries them.
pub fn write_tracks(path: impl AsRef<Path>, table: &TrackTable) -> Result<()> {
    let with_mc = !table.is_empty() && table.iter().all(|t| t.mc.is_some());

    let mut fields = vec![
        Field::new("pt_signed", DataType::Float64, false),
        Field::new("eta", DataType::Float64, false),
        Field::new("tpc_inner_param", DataType::Float64, false),
        Field::new("tpc_signal", DataType::Float64, false),
        Field::new("beta", DataType::Float64, false),
        Field::new("dca_xy", DataType::Float64, false),
        Field::new("dca_z", DataType::Float64, false),
        Field::new("tpc_clusters", DataType::UInt16, false),
        Field::new("its_cluster_map", DataType::UInt32, false),
        Field::new("flags", DataType::UInt32, false),
    ];
    if with_mc {
        fields.push(Field::new("gen_pt", DataType::Float64, false));
        fields.push(Field::new("gen_eta", DataType::Float64, false));
        fields.push(Field::new("pdg_code", DataType::Int32, false));
    }
    let schema = Arc::new(Schema::new(fields));

    let f64_col = |f: &dyn Fn(&TrackRecord) -> f64| -> ArrayRef {
        Arc::new(Float64Array::from_iter_values(table.iter().map(f)))
    };
    let mut columns: Vec<ArrayRef> = vec![
        f64_col(&|t| t.pt_signed),
        f64_col(&|t| t.eta),
        f64_col(&|t| t.tpc_inner_param),
        f64_col(&|t| t.tpc_signal),
        f64_col(&|t| t.beta),
        f64_col(&|t| t.dca_xy),
        f64_col(&|t| t.dca_z),
        Arc::new(UInt16Array::from_iter_values(table.iter().map(|t| t.tpc_clusters))),
        Arc::new(UInt32Array::from_iter_values(table.iter().map(|t| t.its_cluster_map))),
        Arc::new(UInt32Array::from_iter_values(table.iter().map(|t| t.flags))),
    ];
    if with_mc {
        columns.push(f64_col(&|t| t.mc.map_or(f64::NAN, |m| m.gen_pt)));
        columns.push(f64_col(&|t| t.mc.map_or(f64::NAN, |m| m.gen_eta)));
        columns.push(Arc::new(Int32Array::from_iter_values(
            table.iter().map(|t| t.mc.map_or(0, |m| m.pdg_code)),
        )));
    }

    let batch = RecordBatch::try_new(schema.clone(), columns)?;
    let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
    let file = File::create(path.as_ref())?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}
