//! Instruction-Level Replication: per-function shadow production,
//! check insertion, phi rewiring, loop-header checks, and control-flow
//! hardening (§4.4-§4.8).

pub mod check;
pub mod control_flow;
pub mod duplicate;
pub mod loop_checks;
pub mod phi;

use std::collections::HashSet;

use tracing::{debug, info};

use crate::driver;
use crate::error::PassResult;
use crate::helpers::HelperRegistry;
use crate::ir::dominator::DominatorTree;
use crate::ir::function::Function;
use crate::ir::loops::LoopInfo;
use crate::ir::module::Module;
use crate::ir::opcode::Opcode;
use crate::ir::value::ValueId;
use crate::shadow::ShadowMap;

use check::CheckIdAllocator;
use control_flow::DetectedBlockCache;
use loop_checks::LoopHeaderCheckToken;
use phi::{GlobalConstCache, PendingPhi};

/// Per-module state that outlives any single function (§9 "Global
/// caches", §5).
#[derive(Default)]
pub struct IlrModuleState {
    pub detected_blocks: DetectedBlockCache,
    pub global_consts: GlobalConstCache,
}

/// What ILR produced for one function, handed to TX afterward.
pub struct IlrFunctionResult {
    pub shadow_map: ShadowMap,
    pub loop_header_tokens: Vec<LoopHeaderCheckToken>,
}

/// Runs ILR over every defined function in `module`.
pub fn run_module(module: &mut Module, helpers: &HelperRegistry) -> PassResult<Vec<(String, IlrFunctionResult)>> {
    let mut state = IlrModuleState::default();
    let names: Vec<String> = module
        .functions
        .iter()
        .filter(|f| !f.is_declaration)
        .map(|f| f.name.clone())
        .collect();

    let mut results = Vec::new();
    for name in names {
        info!(function = %name, "running ILR");
        let result = run_function_by_name(module, helpers, &mut state, &name)?;
        results.push((name, result));
    }
    Ok(results)
}

fn run_function_by_name(
    module: &mut Module,
    helpers: &HelperRegistry,
    state: &mut IlrModuleState,
    name: &str,
) -> PassResult<IlrFunctionResult> {
    // The borrow checker can't let us hold `&mut Function` from inside
    // `module` while also reading `module` for callee classification, so
    // we take the function out, transform it, and put it back.
    let idx = module
        .functions
        .iter()
        .position(|f| f.name == name)
        .expect("function must exist");
    let mut function = module.functions.remove(idx);

    let result = run_function(&mut function, module, helpers, state);

    module.functions.insert(idx, function);
    result
}

fn run_function(
    function: &mut Function,
    module: &mut Module,
    helpers: &HelperRegistry,
    state: &mut IlrModuleState,
) -> PassResult<IlrFunctionResult> {
    let doms = DominatorTree::compute(function);
    let order = driver::full_processing_order(function, &doms);
    let entry = doms.entry();

    let mut shadow_map = ShadowMap::new();
    let arg_shadow_count = duplicate::shadow_args(function, &mut shadow_map)?;
    let mut ids = CheckIdAllocator::default();
    let mut mover_shadowed: HashSet<ValueId> = HashSet::new();
    let mut pending_phis: Vec<PendingPhi> = Vec::new();
    let mut conditional_branch_blocks = Vec::new();

    for block in order {
        // `shadow_args` already prepended the argument mover calls to
        // the entry block; skip over them so they aren't re-shadowed
        // and re-checked as if they were original instructions.
        let mut i = if block == entry { arg_shadow_count } else { 0 };
        while i < function.block(block).map(|b| b.instructions.len()).unwrap_or(0) {
            let opcode = function.block(block).unwrap().instructions[i].opcode;

            let outcome = duplicate::shadow_instruction(function, module, helpers, &mut shadow_map, block, i)?;
            if outcome.is_mover_shadow {
                if let Some(result) = function.block(block).unwrap().instructions[i].result {
                    mover_shadowed.insert(result);
                }
            }
            if opcode == Opcode::PHI {
                if let (Some(original), Some(inst)) = (
                    function.block(block).unwrap().instructions.get(i).and_then(|x| x.result),
                    function.block(block).unwrap().instructions.get(i + 1),
                ) {
                    if let Some(shadow) = inst.result {
                        pending_phis.push(PendingPhi {
                            original,
                            shadow,
                            block,
                        });
                    }
                }
            }

            let (before, after) =
                check::check_instruction(function, module, helpers, &shadow_map, &mut ids, &mover_shadowed, block, i)?;

            if opcode == Opcode::Br
                && function
                    .block(block)
                    .and_then(|b| b.instructions.get(i))
                    .is_some_and(|t| t.payload.successors.len() == 2)
            {
                conditional_branch_blocks.push(block);
            }

            i += before + 1 + outcome.inserted + after;
            debug!(?block, index = i, "processed instruction");
        }
    }

    phi::rewire(function, module, &shadow_map, &mut state.global_consts, &pending_phis)?;

    let detected_helper = helpers.detected().to_string();
    for block in conditional_branch_blocks {
        control_flow::harden_conditional_branch(
            function,
            &shadow_map,
            &mut state.detected_blocks,
            &detected_helper,
            block,
        )?;
    }

    let doms_after = DominatorTree::compute(function);
    let loop_info = LoopInfo::compute(function, &doms_after);
    let mut loop_header_tokens = Vec::new();
    for lp in loop_info.all_innermost_first() {
        loop_header_tokens.extend(loop_checks::insert_loop_header_checks(function, &shadow_map, &mut ids, lp)?);
    }

    debug_assert!(shadow_map.is_injective(), "shadow map must stay injective");

    Ok(IlrFunctionResult {
        shadow_map,
        loop_header_tokens,
    })
}
