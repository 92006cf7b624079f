//! Transactification: wraps ILR-hardened code in HTM regions bounded by
//! a dynamic per-thread instruction counter (§4.9-§4.11).

pub mod boundary;
pub mod config;
pub mod longest_path;
pub mod optimize;

use tracing::info;

use crate::error::PassResult;
use crate::helpers::HelperRegistry;
use crate::ilr::IlrFunctionResult;
use crate::ir::module::Module;

pub use config::TxConfig;

/// Runs TX over every defined function in `module`, given the loop-
/// header-check tokens ILR produced for each one.
pub fn run_module(
    module: &mut Module,
    helpers: &HelperRegistry,
    config: &TxConfig,
    ilr_results: &[(String, IlrFunctionResult)],
) -> PassResult<()> {
    for (name, result) in ilr_results {
        info!(function = %name, "running TX");
        run_function_by_name(module, helpers, config, name, &result.loop_header_tokens)?;
    }
    Ok(())
}

fn run_function_by_name(
    module: &mut Module,
    helpers: &HelperRegistry,
    config: &TxConfig,
    name: &str,
    loop_header_tokens: &[crate::ilr::loop_checks::LoopHeaderCheckToken],
) -> PassResult<()> {
    let idx = module
        .functions
        .iter()
        .position(|f| f.name == name)
        .expect("function must exist");
    let mut function = module.functions.remove(idx);

    let result = run_function(&mut function, module, helpers, config, loop_header_tokens);

    module.functions.insert(idx, function);
    result
}

fn run_function(
    function: &mut crate::ir::function::Function,
    module: &Module,
    helpers: &HelperRegistry,
    config: &TxConfig,
    loop_header_tokens: &[crate::ilr::loop_checks::LoopHeaderCheckToken],
) -> PassResult<()> {
    boundary::place_boundaries(function, module, helpers, config, loop_header_tokens)?;
    optimize::optimize_function(function, helpers);
    Ok(())
}
