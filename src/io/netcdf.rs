use std::error::Error;
use std::path::Path;

use chrono::NaiveDateTime;

use crate::io::results::SimulationResults;

// Write the (node, time) result cube to NetCDF
pub fn write_netcdf_output(
    filename: &Path,
    results: &SimulationResults,
    reference_time: &NaiveDateTime,
) -> Result<(), Box<dyn Error>> {
    let mut file = netcdf::create(filename)?;

    file.add_dimension("node", results.nodes.len())?;
    file.add_dimension("time", results.times.len())?;

    let mut time_var = file.add_variable::<f64>("time", &["time"])?;
    time_var.put_attribute("long_name", "valid output time")?;
    time_var.put_attribute("standard_name", "time")?;
    time_var.put_attribute(
        "units",
        format!(
            "seconds since {}",
            reference_time.format("%Y-%m-%d %H:%M:%S")
        ),
    )?;
    time_var.put_values(&results.times, ..)?;

    let mut link_var = file.add_variable::<i64>("link", &["node"])?;
    link_var.put_attribute("long_name", "Channel link id")?;
    link_var.put_values(&results.links, ..)?;

    let mut node_var = file.add_variable::<i64>("link_node", &["node"])?;
    node_var.put_attribute("long_name", "Node number within the link, from 1")?;
    node_var.put_values(&results.nodes, ..)?;

    let mut flow_var = file.add_variable::<f32>("discharge", &["node", "time"])?;
    flow_var.put_attribute("_FillValue", -9999.0f32)?;
    flow_var.put_attribute("long_name", "Discharge")?;
    flow_var.put_attribute("units", "m3 s-1")?;
    for i in 0..results.nodes.len() {
        flow_var.put_values(&results.flow_data[i], (&i, ..))?;
    }

    let mut depth_var = file.add_variable::<f32>("depth", &["node", "time"])?;
    depth_var.put_attribute("_FillValue", -9999.0f32)?;
    depth_var.put_attribute("long_name", "Water depth above the bed")?;
    depth_var.put_attribute("units", "m")?;
    for i in 0..results.nodes.len() {
        depth_var.put_values(&results.depth_data[i], (&i, ..))?;
    }

    file.add_attribute("TITLE", "OUTPUT FROM CASC_ROUTE")?;
    file.add_attribute(
        "file_reference_time",
        reference_time.format("%Y-%m-%d_%H:%M:%S").to_string(),
    )?;

    Ok(())
}
