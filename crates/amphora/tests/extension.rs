//! Registers a host extension and checks it is merged into new Globals.
//!
//! This lives in its own test binary: the registry freezes when the first
//! Global is constructed, so registration has to happen before any other
//! test in the same process builds one.

use amphora::{
    ArgSpec, Args, CollectOutput, ConstVal, Ctx, Ext, ExtFunction, Global, RunResult, Value, register_ext,
};

fn fn_triple(_cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    let n = match args.get(0) {
        Some(Value::Int(i)) => i,
        _ => 0,
    };
    Ok(Value::Int(n * 3))
}

fn fn_swap(cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    // both parameters are by-reference: writes are visible to the caller
    let (Some(a), Some(b)) = (args.cell(0), args.cell(1)) else {
        cx.warn("swap() expects two variables")?;
        return Ok(Value::Bool(false));
    };
    let tmp = a.get();
    a.set(b.get());
    b.set(tmp);
    Ok(Value::Bool(true))
}

const ARGS_N: [ArgSpec; 1] = [ArgSpec::required("n")];
const ARGS_SWAP: [ArgSpec; 2] = [ArgSpec::by_ref("a"), ArgSpec::by_ref("b")];

#[test]
fn host_extension_functions_and_constants() {
    register_ext(Ext {
        name: "demo",
        version: "0.1.0",
        functions: vec![
            ("triple", ExtFunction {
                handler: fn_triple,
                args: &ARGS_N,
            }),
            ("swap", ExtFunction {
                handler: fn_swap,
                args: &ARGS_SWAP,
            }),
        ],
        classes: vec![],
        constants: vec![("DEMO_LEVEL", ConstVal::Int(9))],
    });

    let (writer, handle) = CollectOutput::new();
    let mut global = Global::new(Box::new(writer));
    let code = global
        .run_source(
            "ext.php",
            br"<?php
            echo triple(14), ';';
            $x = 'left';
            $y = 'right';
            swap($x, $y);
            echo $x, '-', $y, ';';
            echo DEMO_LEVEL;
            ",
        )
        .unwrap();
    assert_eq!(code, 0);
    assert_eq!(handle.to_string_lossy(), "42;right-left;9");

    let exts = amphora::loaded_extensions();
    assert!(exts.iter().any(|(name, version)| *name == "demo" && *version == "0.1.0"));
}
