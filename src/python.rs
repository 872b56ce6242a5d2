//! Python bindings for the NDVI band math

use crate::core::composite::median_composite;
use crate::core::ndvi::{mask_non_positive, normalized_difference};
use crate::core::sites::SiteRegistry;
use crate::types::{GeoTransform, GridSpec, NdviError, NdviRaster};
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn to_py_err(e: NdviError) -> PyErr {
    match e {
        NdviError::DimensionMismatch { .. } | NdviError::InvalidParameter(_) => PyValueError::new_err(e.to_string()),
        _ => PyRuntimeError::new_err(e.to_string()),
    }
}

/// Unit grid shared by plain arrays of one shape
fn unit_grid(rows: usize, cols: usize) -> GridSpec {
    GridSpec::new(GeoTransform::north_up(0.0, rows as f64, 1.0, 1.0), rows, cols)
}

/// NDVI of two reflectance arrays; undefined pixels are NaN
#[pyfunction]
fn compute_ndvi<'py>(
    py: Python<'py>,
    nir: PyReadonlyArray2<'py, f32>,
    red: PyReadonlyArray2<'py, f32>,
) -> PyResult<&'py PyArray2<f32>> {
    let nir = nir.as_array().to_owned();
    let red = red.as_array().to_owned();
    let ndvi = py.allow_threads(|| normalized_difference(&nir, &red)).map_err(to_py_err)?;
    Ok(ndvi.into_pyarray(py))
}

/// Set values below `epsilon` to NaN
#[pyfunction]
#[pyo3(signature = (ndvi, epsilon = 0.001))]
fn mask_low_values<'py>(py: Python<'py>, ndvi: PyReadonlyArray2<'py, f32>, epsilon: f32) -> PyResult<&'py PyArray2<f32>> {
    let data = ndvi.as_array().to_owned();
    let (rows, cols) = data.dim();
    let raster = NdviRaster::new(data, unit_grid(rows, cols).transform, None);
    Ok(mask_non_positive(&raster, epsilon).data.into_pyarray(py))
}

/// Per-pixel median of equally shaped NDVI arrays, ignoring NaN
#[pyfunction]
fn median<'py>(py: Python<'py>, layers: Vec<PyReadonlyArray2<'py, f32>>) -> PyResult<&'py PyArray2<f32>> {
    let Some(first) = layers.first() else {
        return Err(PyValueError::new_err("at least one array is required"));
    };
    let (rows, cols) = first.as_array().dim();
    let grid = unit_grid(rows, cols);

    let rasters = layers
        .iter()
        .map(|layer| {
            let data = layer.as_array().to_owned();
            if data.dim() != (rows, cols) {
                return Err(PyValueError::new_err(format!(
                    "array of shape {:?} does not match ({}, {})",
                    data.dim(),
                    rows,
                    cols
                )));
            }
            Ok(NdviRaster::new(data, grid.transform, None))
        })
        .collect::<PyResult<Vec<_>>>()?;

    let composite = py.allow_threads(|| median_composite(&rasters, &grid));
    Ok(composite.data.into_pyarray(py))
}

/// Reference sites as (name, lon, lat)
#[pyfunction]
fn tortola_sites() -> Vec<(String, f64, f64)> {
    SiteRegistry::tortola()
        .iter()
        .map(|s| (s.name.clone(), s.location.lon, s.location.lat))
        .collect()
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(compute_ndvi, m)?)?;
    m.add_function(wrap_pyfunction!(mask_low_values, m)?)?;
    m.add_function(wrap_pyfunction!(median, m)?)?;
    m.add_function(wrap_pyfunction!(tortola_sites, m)?)?;
    Ok(())
}
