//! Python bindings for the labeling side of the workflow

use crate::core::labels::{ClassLegend, LabelStore};
use crate::io::table;
use crate::types::{MosaicKey, PlumbError};
use chrono::NaiveDate;
use pyo3::prelude::*;

fn to_py_err(e: PlumbError) -> PyErr {
    match e {
        PlumbError::UnknownClass(_) | PlumbError::InvalidFormat(_) => {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
        }
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
    }
}

fn parse_date(date: &str) -> PyResult<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| {
        PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("Invalid date '{}': {}", date, e))
    })
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyClassLegend>()?;
    m.add_class::<PyLabelStore>()?;
    m.add_function(wrap_pyfunction!(export_filename, m)?)?;
    Ok(())
}

/// Python wrapper for ClassLegend
#[pyclass(name = "ClassLegend")]
#[derive(Clone)]
struct PyClassLegend {
    inner: ClassLegend,
}

#[pymethods]
impl PyClassLegend {
    #[new]
    fn new(version: &str) -> PyResult<Self> {
        let inner = ClassLegend::builtin(version).map_err(to_py_err)?;
        Ok(PyClassLegend { inner })
    }

    #[getter]
    fn version(&self) -> String {
        self.inner.version().to_string()
    }

    #[getter]
    fn names(&self) -> Vec<String> {
        self.inner.names().iter().map(|n| n.to_string()).collect()
    }

    fn code_of(&self, name: &str) -> PyResult<u8> {
        self.inner.code_of(name).map_err(to_py_err)
    }

    fn fingerprint(&self) -> String {
        self.inner.fingerprint()
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }

    fn __repr__(&self) -> String {
        format!("ClassLegend('{}', classes={:?})", self.inner.version(), self.inner.names())
    }
}

/// Python wrapper for LabelStore
#[pyclass(name = "LabelStore")]
struct PyLabelStore {
    inner: LabelStore,
}

#[pymethods]
impl PyLabelStore {
    #[new]
    fn new(legend: &PyClassLegend) -> Self {
        PyLabelStore {
            inner: LabelStore::new(legend.inner.clone()),
        }
    }

    /// Add a point labeled on the mosaic for (mission, date, tile)
    fn add(&mut self, class_name: &str, lon: f64, lat: f64, mission: &str, date: &str, tile_id: u32) -> PyResult<()> {
        let key = MosaicKey::new(mission, parse_date(date)?, tile_id);
        self.inner.add(class_name, lon, lat, key).map_err(to_py_err)
    }

    fn count(&self, class_name: &str) -> usize {
        self.inner.count(class_name)
    }

    /// Merged label table as CSV text
    fn to_csv(&self) -> PyResult<String> {
        let merged = self.inner.snapshot().map_err(to_py_err)?;
        let mut buf = Vec::new();
        table::write_label_csv(&merged, &mut buf).map_err(to_py_err)?;
        String::from_utf8(buf).map_err(|e| PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)))
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }
}

/// Export file name for a labeler, mission and date
#[pyfunction]
fn export_filename(initials: &str, mission: &str, date: &str, export_date: &str) -> PyResult<String> {
    Ok(table::export_filename(
        initials,
        mission,
        parse_date(date)?,
        parse_date(export_date)?,
    ))
}
