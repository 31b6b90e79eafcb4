//! Tests for the request context: name registries, superglobals,
//! configuration, cancellation, and the host-facing entry points.

use amphora::{CollectOutput, FatalKind, Global, Request, RequestError, ResourceLimits};

fn collected_global() -> (Global, amphora::CollectedHandle) {
    let (writer, handle) = CollectOutput::new();
    (Global::new(Box::new(writer)), handle)
}

#[test]
fn identifiers_resolve_case_insensitively() {
    let (mut global, handle) = collected_global();
    let code = global
        .run_source(
            "ci.php",
            br"<?php
            function Mixed_Case() { return 'f'; }
            class CamelBox { public $v = 'c'; }
            $o = new camelbox();
            echo MIXED_CASE(), $o->v, get_class($o);
            ",
        )
        .unwrap();
    assert_eq!(code, 0);
    // the class keeps its declared spelling for display
    assert_eq!(handle.to_string_lossy(), "fcCamelBox");
}

#[test]
fn lazy_resolution_is_idempotent() {
    let (mut global, handle) = collected_global();
    // both calls resolve to the same function; the declaration registers
    // once even though it is reached lazily first and in program order later
    let code = global
        .run_source(
            "lazy.php",
            br"<?php
            echo pick(), pick();
            function pick() { return 'p'; }
            echo pick();
            ",
        )
        .unwrap();
    assert_eq!(code, 0);
    assert_eq!(handle.to_string_lossy(), "ppp");
}

#[test]
fn duplicate_function_registration_is_fatal() {
    let (mut global, _handle) = collected_global();
    let err = global
        .run_source("dup.php", br"<?php function f() {} function f() {}")
        .unwrap_err();
    match err {
        RequestError::Fatal(fatal) => assert_eq!(fatal.kind, FatalKind::DuplicateFunction),
        other => panic!("expected duplicate-function fatal, got {other}"),
    }
}

#[test]
fn constants_define_and_fetch() {
    let (mut global, handle) = collected_global();
    global
        .run_source(
            "const.php",
            br"<?php
            define('ANSWER', 42);
            const LOCAL = 'x';
            echo ANSWER, LOCAL, defined('ANSWER') ? '!' : '?';
            ",
        )
        .unwrap();
    assert_eq!(handle.to_string_lossy(), "42x!");
}

#[test]
fn extension_constants_are_seeded() {
    let (mut global, handle) = collected_global();
    global
        .run_source("seed.php", br"<?php echo PHP_INT_SIZE; echo PHP_EOL;")
        .unwrap();
    assert_eq!(handle.to_string_lossy(), "8\n");
}

#[test]
fn superglobals_follow_the_request() {
    let (writer, handle) = CollectOutput::new();
    let mut global = Global::new(Box::new(writer));
    global.set_request(
        Request::new("POST", "/submit?a=1&tags[]=x&tags[]=y")
            .header("Cookie", "sid=abc")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(b"name=ada".to_vec()),
    );
    global
        .run_source(
            "req.php",
            br#"<?php
            echo $_GET['a'], ';';
            echo count($_GET['tags']), ';';
            echo $_POST['name'], ';';
            echo $_COOKIE['sid'], ';';
            echo $_REQUEST['a'], $_REQUEST['name'], ';';
            echo $_SERVER['REQUEST_METHOD'];
            "#,
        )
        .unwrap();
    assert_eq!(handle.to_string_lossy(), "1;2;ada;abc;1ada;POST");
}

#[test]
fn superglobals_visible_inside_functions() {
    let (writer, handle) = CollectOutput::new();
    let mut global = Global::new(Box::new(writer));
    global.set_request(Request::new("GET", "/?who=it"));
    global
        .run_source(
            "vis.php",
            br"<?php
            function who() { return $_GET['who']; }
            echo who();
            ",
        )
        .unwrap();
    assert_eq!(handle.to_string_lossy(), "it");
}

#[test]
fn variables_order_setting_controls_population() {
    let (writer, handle) = CollectOutput::new();
    let mut global = Global::new(Box::new(writer));
    // with G excluded, the query string must not populate _GET
    global.set_local_config("variables_order", "ES");
    global.set_request(Request::new("GET", "/?a=1"));
    global
        .run_source(
            "order.php",
            br"<?php echo count($_GET), count($_REQUEST);",
        )
        .unwrap();
    assert_eq!(handle.to_string_lossy(), "00");
}

#[test]
fn ini_settings_are_request_local() {
    let (mut global, handle) = collected_global();
    assert_eq!(global.get_config("variables_order", ""), "EGPCS");
    global
        .run_source(
            "ini.php",
            br"<?php
            echo ini_get('variables_order'), ';';
            ini_set('display_errors', '0');
            echo ini_get('display_errors');
            ",
        )
        .unwrap();
    assert_eq!(handle.to_string_lossy(), "EGPCS;0");
}

#[test]
fn cancellation_token_aborts_the_request() {
    let (writer, _handle) = CollectOutput::new();
    let mut global = Global::new(Box::new(writer));
    global.cancel_token().cancel();
    let err = global.run_source("never.php", br"<?php echo 'unreached';").unwrap_err();
    match err {
        RequestError::Fatal(fatal) => assert_eq!(fatal.kind, FatalKind::Cancelled),
        other => panic!("expected cancellation, got {other}"),
    }
}

#[test]
fn deadline_can_be_moved_by_the_host() {
    let (writer, _handle) = CollectOutput::new();
    let mut global = Global::with_limits(Box::new(writer), ResourceLimits::unlimited());
    global.set_deadline(std::time::Instant::now() - std::time::Duration::from_millis(1));
    let err = global.run_source("late.php", br"<?php echo 1;").unwrap_err();
    match err {
        RequestError::Fatal(fatal) => assert_eq!(fatal.kind, FatalKind::Timeout),
        other => panic!("expected timeout, got {other}"),
    }
}

#[test]
fn run_file_through_the_stream_handlers() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("amphora_runfile_{}.php", std::process::id()));
    std::fs::write(&path, b"<?php echo 'from file'; exit(4);").unwrap();
    let (writer, handle) = CollectOutput::new();
    let mut global = Global::new(Box::new(writer));
    let code = global.run_file(&path.display().to_string()).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(code, 4);
    assert_eq!(handle.to_string_lossy(), "from file");
}

#[test]
fn run_file_missing_script_fails() {
    let (writer, _handle) = CollectOutput::new();
    let mut global = Global::new(Box::new(writer));
    let err = global.run_file("/no/such/root.php").unwrap_err();
    match err {
        RequestError::Fatal(ref fatal) => assert_eq!(fatal.kind, FatalKind::RequireFailed),
        other => panic!("expected require failure, got {other}"),
    }
    assert!(err.exit_code() != 0);
}

#[test]
fn core_extension_is_loaded() {
    // construction freezes the registry and copies the catalog
    let (_global, _handle) = collected_global();
    let exts = amphora::loaded_extensions();
    assert!(exts.iter().any(|(name, _)| *name == "core"));
}

#[test]
fn output_drains_buffers_on_close() {
    let (mut global, handle) = collected_global();
    // two unclosed buffers must still drain to the writer at end of request
    global
        .run_source(
            "drain.php",
            br"<?php
            echo 'a';
            ob_start();
            echo 'b';
            ob_start();
            echo 'c';
            ",
        )
        .unwrap();
    assert_eq!(handle.to_string_lossy(), "abc");
}
