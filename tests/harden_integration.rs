//! End-to-end scenarios exercising ILR and TX together against a small
//! hand-built module, the way a `seq`/`arraywrite`-style fixture would.

use swift_harden::helpers::HelperRegistry;
use swift_harden::ir::builder::FunctionBuilder;
use swift_harden::ir::instruction::{Instruction, InstructionPayload, MemoryAttrs};
use swift_harden::ir::opcode::Opcode;
use swift_harden::ir::types::Type;
use swift_harden::ir::{BasicBlock, BlockId, Constant, Function, Module, Value, ValueId, ValueKind};
use swift_harden::tx::{boundary, optimize};
use swift_harden::{harden_module, ilr, TxConfig};

const CANONICAL_SUFFIXES: [&str; 10] = [
    "i8", "i16", "i32", "i64", "ptr", "float", "double", "ps", "pd", "dq",
];

const TX_HELPERS: [&str; 8] = [
    "tx_start",
    "tx_end",
    "tx_cond_start",
    "tx_abort",
    "tx_threshold_exceeded",
    "tx_increment",
    "tx_pthread_mutex_lock",
    "tx_pthread_mutex_unlock",
];

fn declare(module: &mut Module, name: &str) {
    let mut f = Function::new(name, Type::Void);
    f.is_declaration = true;
    module.functions.push(f);
}

fn register_runtime_helpers(module: &mut Module) {
    for suffix in CANONICAL_SUFFIXES {
        declare(module, &format!("SWIFT$check_{suffix}"));
        declare(module, &format!("SWIFT$move_{suffix}"));
    }
    declare(module, "SWIFT$detected");
    for name in TX_HELPERS {
        declare(module, &format!("SWIFT${name}"));
    }
}

/// `store_sum(a, b, out)`: computes `a + b` and stores it to `out`, a
/// non-atomic, non-global pointer — the §4.6 "check after store" case.
fn build_store_sum() -> Function {
    let builder = FunctionBuilder::new("store_sum", Type::Void);
    let (builder, a) = builder.argument(Type::I32);
    let (builder, b) = builder.argument(Type::I32);
    let (mut builder, out) = builder.argument(Type::Pointer);

    let entry = builder.new_block("entry");
    let add = Instruction::new(Opcode::Add, entry, vec![a, b]);
    let sum = builder.append(entry, add, Some(Type::I32)).unwrap();

    let store = Instruction {
        opcode: Opcode::Store,
        result: None,
        operands: vec![sum, out],
        parent: entry,
        payload: InstructionPayload {
            memory: Some(MemoryAttrs::plain(4)),
            ..InstructionPayload::default()
        },
    };
    builder.append(entry, store, None);

    let ret = Instruction::new(Opcode::Ret, entry, vec![]);
    builder.append(entry, ret, None);

    builder.finish()
}

#[test]
fn ilr_shadows_the_add_and_checks_the_store() {
    let mut module = Module::new();
    register_runtime_helpers(&mut module);
    module.functions.push(build_store_sum());

    let helpers = HelperRegistry::resolve(&module).expect("all helpers declared");
    let results = ilr::run_module(&mut module, &helpers).expect("ILR succeeds");
    assert_eq!(results.len(), 1);
    let (name, result) = &results[0];
    assert_eq!(name, "store_sum");

    let function = module.function("store_sum").unwrap();
    let entry = function.entry_block().unwrap();

    let opcodes: Vec<Opcode> = entry.instructions.iter().map(|i| i.opcode).collect();
    assert_eq!(
        opcodes,
        vec![
            Opcode::Add,   // original sum
            Opcode::Add,   // shadow sum, cloned immediately after
            Opcode::Store, // original store, untouched
            Opcode::Load,  // volatile reload of the stored address
            Opcode::Call,  // check_i32(reloaded, shadow_sum, id)
            Opcode::Ret,
        ]
    );

    let check_call = &entry.instructions[4];
    assert_eq!(check_call.payload.callee.as_deref(), Some("SWIFT$check_i32"));
    assert_eq!(check_call.operands.len(), 3);

    // The original sum's result has exactly one recorded shadow.
    let original_sum = entry.instructions[0].result.unwrap();
    let shadow_sum = result.shadow_map.get(function, original_sum).unwrap();
    assert_eq!(shadow_sum, entry.instructions[1].result);
    assert!(result.shadow_map.is_injective());
}

#[test]
fn tx_wraps_a_called_from_outside_function_start_to_end() {
    let mut module = Module::new();
    register_runtime_helpers(&mut module);
    module.functions.push(build_store_sum());

    let mut config = TxConfig::default();
    config.called_from_outside.insert("store_sum".to_string());

    harden_module(&mut module, &config).expect("harden_module succeeds");

    let function = module.function("store_sum").unwrap();
    let entry = function.entry_block().unwrap();

    let first_call = entry
        .instructions
        .iter()
        .find(|i| i.opcode == Opcode::Call)
        .expect("at least one call");
    assert_eq!(first_call.payload.callee.as_deref(), Some("SWIFT$tx_start"));

    let last_call_before_ret = entry
        .instructions
        .iter()
        .rev()
        .find(|i| i.opcode == Opcode::Call)
        .expect("at least one call");
    assert_eq!(last_call_before_ret.payload.callee.as_deref(), Some("SWIFT$tx_end"));

    assert_eq!(entry.instructions.last().unwrap().opcode, Opcode::Ret);
}

#[test]
fn helper_resolution_fails_fast_when_a_helper_is_missing() {
    let mut module = Module::new();
    module.functions.push(build_store_sum());
    // No runtime helpers registered at all.
    assert!(HelperRegistry::resolve(&module).is_err());
}

fn int_const(function: &mut Function, ty: Type, value: u64) -> ValueId {
    let id = function.fresh_value_id();
    function.insert_value(Value {
        id,
        ty: ty.clone(),
        kind: ValueKind::Constant(Constant::Int { ty, value }),
    });
    id
}

fn result_value(function: &mut Function, ty: Type) -> ValueId {
    let id = function.fresh_value_id();
    function.insert_value(Value {
        id,
        ty,
        kind: ValueKind::InstructionResult(id),
    });
    id
}

fn argument(function: &mut Function, ty: Type) -> ValueId {
    let idx = function.arguments.len() as u32;
    function.arguments.push(ty.clone());
    let id = function.fresh_value_id();
    function.insert_value(Value {
        id,
        ty,
        kind: ValueKind::Argument(idx),
    });
    id
}

fn br(from: BlockId, operands: Vec<ValueId>, successors: Vec<BlockId>) -> Instruction {
    Instruction {
        opcode: Opcode::Br,
        result: None,
        operands,
        parent: from,
        payload: InstructionPayload {
            successors,
            ..InstructionPayload::default()
        },
    }
}

/// A tight single-block `while (i < 10) i++;`-style loop: `preheader ->
/// header -> header` (self back edge) `/ exit`, mirroring
/// `arraywrite`'s innermost counting loop.
#[test]
fn tx_collapses_a_tight_single_block_loop_into_one_preheader_increment() {
    let mut module = Module::new();
    register_runtime_helpers(&mut module);
    let helpers = HelperRegistry::resolve(&module).expect("all helpers declared");

    let mut f = Function::new("tight_loop_sum", Type::Void);
    let preheader = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(preheader, "preheader"));
    let header = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(header, "header"));
    let exit = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(exit, "exit"));

    let zero = int_const(&mut f, Type::I32, 0);
    let one = int_const(&mut f, Type::I32, 1);
    let bound = int_const(&mut f, Type::I32, 10);

    let i_next = result_value(&mut f, Type::I32);
    let i = result_value(&mut f, Type::I32);
    f.block_mut(header).unwrap().push(Instruction {
        opcode: Opcode::PHI,
        result: Some(i),
        operands: vec![zero, i_next],
        parent: header,
        payload: InstructionPayload {
            incoming_blocks: vec![preheader, header],
            ..InstructionPayload::default()
        },
    });
    f.block_mut(header).unwrap().push(Instruction {
        opcode: Opcode::Add,
        result: Some(i_next),
        operands: vec![i, one],
        parent: header,
        payload: InstructionPayload::default(),
    });
    let cond = result_value(&mut f, Type::I1);
    f.block_mut(header).unwrap().push(Instruction {
        opcode: Opcode::ICmp,
        result: Some(cond),
        operands: vec![i_next, bound],
        parent: header,
        payload: InstructionPayload::default(),
    });
    f.block_mut(header).unwrap().push(br(header, vec![cond], vec![header, exit]));

    f.block_mut(preheader).unwrap().push(br(preheader, vec![], vec![header]));
    f.block_mut(exit).unwrap().push(Instruction::new(Opcode::Ret, exit, vec![]));

    let config = TxConfig::default();
    boundary::place_boundaries(&mut f, &module, &helpers, &config, &[]).expect("boundary placement succeeds");
    optimize::optimize_function(&mut f, &helpers);

    let header_block = f.block(header).unwrap();
    assert!(
        header_block.instructions.iter().all(|inst| {
            !(inst.opcode == Opcode::Call
                && matches!(
                    inst.payload.callee.as_deref(),
                    Some("SWIFT$tx_cond_start") | Some("SWIFT$tx_increment")
                ))
        }),
        "a collapsed tight loop must not keep its own per-iteration boundary calls"
    );

    let preheader_block = f.block(preheader).unwrap();
    let hoisted = preheader_block
        .instructions
        .iter()
        .find(|i| i.opcode == Opcode::Call && i.payload.callee.as_deref() == Some("SWIFT$tx_increment"))
        .expect("the collapsed loop's cost must be hoisted into a single preheader increment");
    assert_eq!(hoisted.operands.len(), 1);
}

/// `pthread_mutex_lock(m); ...; pthread_mutex_unlock(m);` with nothing
/// else in between, mirroring `pthreadtest`'s critical section.
#[test]
fn tx_rebinds_a_tiny_critical_section_into_pthread_mutex_intrinsics() {
    let mut module = Module::new();
    register_runtime_helpers(&mut module);
    declare(&mut module, "pthread_mutex_lock");
    declare(&mut module, "pthread_mutex_unlock");
    let helpers = HelperRegistry::resolve(&module).expect("all helpers declared");

    let mut f = Function::new("critical_increment", Type::Void);
    let mutex_ptr = argument(&mut f, Type::Pointer);

    let entry = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(entry, "entry"));
    f.block_mut(entry).unwrap().push(Instruction {
        opcode: Opcode::Call,
        result: None,
        operands: vec![mutex_ptr],
        parent: entry,
        payload: InstructionPayload {
            callee: Some("pthread_mutex_lock".to_string()),
            ..InstructionPayload::default()
        },
    });
    f.block_mut(entry).unwrap().push(Instruction {
        opcode: Opcode::Call,
        result: None,
        operands: vec![mutex_ptr],
        parent: entry,
        payload: InstructionPayload {
            callee: Some("pthread_mutex_unlock".to_string()),
            ..InstructionPayload::default()
        },
    });
    f.block_mut(entry).unwrap().push(Instruction::new(Opcode::Ret, entry, vec![]));

    let config = TxConfig::default();
    boundary::place_boundaries(&mut f, &module, &helpers, &config, &[]).expect("boundary placement succeeds");
    optimize::optimize_function(&mut f, &helpers);

    let entry_block = f.block(entry).unwrap();
    assert!(entry_block
        .instructions
        .iter()
        .all(|i| i.payload.callee.as_deref() != Some("pthread_mutex_lock")));
    assert!(entry_block
        .instructions
        .iter()
        .all(|i| i.payload.callee.as_deref() != Some("pthread_mutex_unlock")));

    let lock_idx = entry_block
        .instructions
        .iter()
        .position(|i| i.payload.callee.as_deref() == Some("SWIFT$tx_pthread_mutex_lock"))
        .expect("the lock call must be rebound to the tx-aware intrinsic");
    let unlock_idx = entry_block
        .instructions
        .iter()
        .position(|i| i.payload.callee.as_deref() == Some("SWIFT$tx_pthread_mutex_unlock"))
        .expect("the unlock call must be rebound to the tx-aware intrinsic");

    assert_ne!(
        entry_block.instructions[lock_idx - 1].payload.callee.as_deref(),
        Some("SWIFT$tx_end"),
        "the tx_end suspending the transaction around the lock call must be removed"
    );
    assert_ne!(
        entry_block.instructions[unlock_idx + 1].payload.callee.as_deref(),
        Some("SWIFT$tx_start"),
        "the tx_start resuming the transaction around the unlock call must be removed"
    );
}

/// A loop header PHI that's only ever consumed by the next iteration's
/// arithmetic (never a store, call, or branch condition) never gets
/// transitively checked in the loop body, so ILR must split an explicit
/// check into its own block and TX must wrap that block start-to-end.
#[test]
fn loop_header_phi_not_checked_in_the_body_gets_an_explicit_check_and_tx_wraps_it() {
    let mut module = Module::new();
    register_runtime_helpers(&mut module);

    let mut f = Function::new("loop_with_unchecked_phi", Type::Void);
    let cont = argument(&mut f, Type::I1);

    let preheader = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(preheader, "preheader"));
    let header = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(header, "header"));
    let body = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(body, "body"));
    let exit = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(exit, "exit"));

    let zero = int_const(&mut f, Type::I32, 0);
    let one = int_const(&mut f, Type::I32, 1);

    let p_next = result_value(&mut f, Type::I32);
    let p = result_value(&mut f, Type::I32);
    f.block_mut(header).unwrap().push(Instruction {
        opcode: Opcode::PHI,
        result: Some(p),
        operands: vec![zero, p_next],
        parent: header,
        payload: InstructionPayload {
            incoming_blocks: vec![preheader, body],
            ..InstructionPayload::default()
        },
    });
    // The loop's exit condition is independent of `p` on purpose: `p`
    // must not reach any check-inducing instruction transitively.
    f.block_mut(header).unwrap().push(br(header, vec![cont], vec![body, exit]));

    f.block_mut(body).unwrap().push(Instruction {
        opcode: Opcode::Add,
        result: Some(p_next),
        operands: vec![p, one],
        parent: body,
        payload: InstructionPayload::default(),
    });
    f.block_mut(body).unwrap().push(br(body, vec![], vec![header]));

    f.block_mut(preheader).unwrap().push(br(preheader, vec![], vec![header]));
    f.block_mut(exit).unwrap().push(Instruction::new(Opcode::Ret, exit, vec![]));

    module.functions.push(f);

    let config = TxConfig::default();
    harden_module(&mut module, &config).expect("harden_module succeeds");

    let function = module.function("loop_with_unchecked_phi").unwrap();

    let checks_block = function
        .blocks
        .iter()
        .find(|b| b.name.starts_with("ilr.loop_checks."))
        .expect("ILR must split an explicit checks block off the unchecked header PHI");

    let check_call = checks_block
        .instructions
        .iter()
        .find(|i| i.opcode == Opcode::Call && i.payload.callee.as_deref() == Some("SWIFT$check_i32"))
        .expect("the loop header PHI must get an explicit check against its shadow");
    assert_eq!(check_call.operands.len(), 3);

    assert!(
        checks_block
            .instructions
            .iter()
            .any(|i| i.payload.callee.as_deref() == Some("SWIFT$tx_end")),
        "TX must close the transaction before the explicit checks run"
    );
    assert!(
        checks_block
            .instructions
            .iter()
            .any(|i| i.payload.callee.as_deref() == Some("SWIFT$tx_start")),
        "TX must reopen the transaction after the explicit checks run"
    );

    let header_block = function.block(header).unwrap();
    assert!(
        !header_block
            .instructions
            .iter()
            .any(|i| i.payload.callee.as_deref() == Some("SWIFT$tx_cond_start")),
        "the dynamic threshold check subsumes the loop's own tx_cond_start"
    );
    assert!(
        header_block
            .instructions
            .iter()
            .any(|i| i.payload.callee.as_deref() == Some("SWIFT$tx_threshold_exceeded")),
        "the placeholder branch must be rewritten against the dynamic threshold"
    );
}

/// A plain `if (a < b) ... else ...` with no loop involved: ILR must
/// replace the branch's two successors with shadow-comparison blocks
/// that re-derive the condition and divert to a shared `Detected` block
/// on mismatch.
#[test]
fn ilr_hardens_a_conditional_branch_with_shadow_comparison_blocks() {
    let mut module = Module::new();
    register_runtime_helpers(&mut module);

    let mut f = Function::new("branch_on_cmp", Type::Void);
    let a = argument(&mut f, Type::I32);
    let b = argument(&mut f, Type::I32);

    let entry = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(entry, "entry"));
    let then_blk = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(then_blk, "then"));
    let else_blk = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(else_blk, "else"));

    let cond = result_value(&mut f, Type::I1);
    f.block_mut(entry).unwrap().push(Instruction {
        opcode: Opcode::ICmp,
        result: Some(cond),
        operands: vec![a, b],
        parent: entry,
        payload: InstructionPayload::default(),
    });
    f.block_mut(entry).unwrap().push(br(entry, vec![cond], vec![then_blk, else_blk]));

    f.block_mut(then_blk).unwrap().push(Instruction::new(Opcode::Ret, then_blk, vec![]));
    f.block_mut(else_blk).unwrap().push(Instruction::new(Opcode::Ret, else_blk, vec![]));

    module.functions.push(f);

    let helpers = HelperRegistry::resolve(&module).expect("all helpers declared");
    ilr::run_module(&mut module, &helpers).expect("ILR succeeds");

    let function = module.function("branch_on_cmp").unwrap();
    let entry_block = function.block(entry).unwrap();
    let term = entry_block.instructions.last().unwrap();
    assert_eq!(term.opcode, Opcode::Br);
    assert_eq!(term.payload.successors.len(), 2);
    let shadow_true = term.payload.successors[0];
    let shadow_false = term.payload.successors[1];
    assert_ne!(shadow_true, then_blk);
    assert_ne!(shadow_false, else_blk);

    let detected = function
        .blocks
        .iter()
        .find(|b| b.name == "Detected")
        .expect("a shared Detected block must be created");
    assert!(detected
        .instructions
        .iter()
        .any(|i| i.payload.callee.as_deref() == Some("SWIFT$detected")));
    assert_eq!(detected.instructions.last().unwrap().opcode, Opcode::Unreachable);

    for shadow_id in [shadow_true, shadow_false] {
        let shadow_block = function.block(shadow_id).expect("shadow comparison block must exist");
        assert!(
            shadow_block.instructions.iter().any(|i| i.opcode == Opcode::ICmp),
            "each shadow block must re-evaluate the shadow comparison"
        );
        let branch = shadow_block.instructions.last().unwrap();
        assert_eq!(branch.opcode, Opcode::Br);
        assert!(branch.payload.successors.contains(&detected.id));
    }

    assert!(function
        .block(shadow_true)
        .unwrap()
        .instructions
        .iter()
        .any(|i| i.opcode == Opcode::Xor), "the true edge must invert the shadow comparison before branching");
    assert!(function
        .block(shadow_true)
        .unwrap()
        .instructions
        .last()
        .unwrap()
        .payload
        .successors
        .contains(&then_blk));
    assert!(function
        .block(shadow_false)
        .unwrap()
        .instructions
        .last()
        .unwrap()
        .payload
        .successors
        .contains(&else_blk));
}

/// `invoke @outside_work() to label %normal unwind label %unwind`: the
/// Invoke is a terminator, so its closing/reopening boundaries cannot
/// both land in its own block the way a plain call's can.
#[test]
fn tx_places_invoke_boundaries_in_the_normal_destination_block() {
    let mut module = Module::new();
    register_runtime_helpers(&mut module);
    declare(&mut module, "outside_work");

    let mut f = Function::new("invoke_example", Type::Void);
    let entry = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(entry, "entry"));
    let normal = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(normal, "normal"));
    let unwind = f.fresh_block_id();
    f.blocks.push(BasicBlock::new(unwind, "unwind"));

    f.block_mut(entry).unwrap().push(Instruction {
        opcode: Opcode::Invoke,
        result: None,
        operands: vec![],
        parent: entry,
        payload: InstructionPayload {
            callee: Some("outside_work".to_string()),
            successors: vec![normal, unwind],
            ..InstructionPayload::default()
        },
    });
    f.block_mut(normal).unwrap().push(Instruction::new(Opcode::Ret, normal, vec![]));
    f.block_mut(unwind).unwrap().push(Instruction::new(Opcode::LandingPad, unwind, vec![]));
    f.block_mut(unwind).unwrap().push(Instruction::new(Opcode::Resume, unwind, vec![]));

    module.functions.push(f);

    let helpers = HelperRegistry::resolve(&module).expect("all helpers declared");
    let ilr_results = ilr::run_module(&mut module, &helpers).expect("ILR succeeds");
    let tokens = ilr_results[0].1.loop_header_tokens.clone();

    let idx = module.functions.iter().position(|f| f.name == "invoke_example").unwrap();
    let mut function = module.functions.remove(idx);
    let config = TxConfig::default();
    boundary::place_boundaries(&mut function, &module, &helpers, &config, &tokens).expect("boundary placement succeeds");

    let entry_block = function.block(entry).unwrap();
    let term = entry_block.instructions.last().unwrap();
    assert_eq!(term.opcode, Opcode::Invoke, "Invoke must remain the block's terminator");

    let before_invoke = &entry_block.instructions[entry_block.instructions.len() - 2];
    assert_eq!(
        before_invoke.payload.callee.as_deref(),
        Some("SWIFT$tx_end"),
        "the closing boundary still goes right before the Invoke, in the same block"
    );

    let normal_block = function.block(normal).unwrap();
    assert_eq!(
        normal_block.instructions.first().unwrap().payload.callee.as_deref(),
        Some("SWIFT$tx_start"),
        "the reopening boundary goes at the front of the normal-destination block, not after the terminator"
    );
}
