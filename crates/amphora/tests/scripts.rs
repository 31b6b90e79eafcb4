//! End-to-end script tests: source in, output and exit code out.

use amphora::{CollectOutput, FatalKind, Global, RequestError, ResourceLimits};

/// Runs a source string with collected output and stock limits.
fn run(source: &str) -> (Result<i32, RequestError>, String) {
    let (writer, handle) = CollectOutput::new();
    let mut global = Global::new(Box::new(writer));
    let result = global.run_source("test.php", source.as_bytes());
    (result, handle.to_string_lossy())
}

fn run_ok(source: &str) -> String {
    let (result, output) = run(source);
    match result {
        Ok(0) => output,
        Ok(code) => panic!("script exited with {code}; output: {output}"),
        Err(err) => panic!("script failed: {err}; output: {output}"),
    }
}

#[test]
fn hello_world() {
    let (result, output) = run(r#"<?php echo "hi"; "#);
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "hi");
}

#[test]
fn literal_text_around_code() {
    let output = run_ok("a<?php echo 1; ?>b<?php echo 2; ?>c");
    assert_eq!(output, "a1b2c");
}

#[test]
fn echo_tag_form() {
    let output = run_ok("x<?= 40 + 2 ?>y");
    assert_eq!(output, "x42y");
}

#[test]
fn array_key_folding() {
    let output = run_ok(r#"<?php $a = []; $a["10"] = 1; $a[10] = 2; echo count($a), ":", $a[10];"#);
    assert_eq!(output, "1:2");
}

#[test]
fn late_static_binding() {
    let output = run_ok(
        r"<?php
        class Base {
            public static function make() {
                return new static();
            }
        }
        class Sub extends Base {}
        echo get_class(Sub::make());
        ",
    );
    assert_eq!(output, "Sub");
}

#[test]
fn lazy_class_forward_reference() {
    let output = run_ok(
        r"<?php
        echo f()->x;
        function f() {
            return new C();
        }
        class C {
            public $x = 1;
        }
        ",
    );
    assert_eq!(output, "1");
}

#[test]
fn reference_alias() {
    let output = run_ok(r"<?php $a = 1; $b =& $a; $b = 5; echo $a;");
    assert_eq!(output, "5");
}

#[test]
fn reference_transitivity() {
    let output = run_ok(r"<?php $a = 1; $b =& $a; $c =& $b; $a = 9; echo $c;");
    assert_eq!(output, "9");
}

#[test]
fn by_reference_parameter() {
    let output = run_ok(
        r"<?php
        function bump(&$n) {
            $n = $n + 1;
        }
        $x = 41;
        bump($x);
        echo $x;
        ",
    );
    assert_eq!(output, "42");
}

#[test]
fn try_catch_across_calls() {
    let (result, output) = run(
        r#"<?php
        function g() {
            throw new Exception("boom");
        }
        try {
            g();
        } catch (Exception $e) {
            echo "caught";
        }
        "#,
    );
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "caught");
}

#[test]
fn catch_binds_exception_object() {
    let output = run_ok(
        r#"<?php
        try {
            throw new Exception("kaput", 7);
        } catch (Exception $e) {
            echo $e->getMessage(), "/", $e->getCode();
        }
        "#,
    );
    assert_eq!(output, "kaput/7");
}

#[test]
fn uncaught_throw_is_reported() {
    let (result, _) = run(r#"<?php throw new Exception("oops");"#);
    match result.unwrap_err() {
        RequestError::Uncaught { class_name, message, .. } => {
            assert_eq!(class_name, "Exception");
            assert_eq!(message, "oops");
        }
        other => panic!("expected uncaught error, got {other}"),
    }
}

#[test]
fn fatal_bypasses_catch() {
    // an undefined function inside try must not be catchable
    let (result, _) = run(
        r"<?php
        try {
            no_such_function();
        } catch (Exception $e) {
            echo 'swallowed';
        }
        ",
    );
    match result.unwrap_err() {
        RequestError::Fatal(fatal) => {
            assert_eq!(fatal.kind, FatalKind::UndefinedFunction);
            assert!(fatal.message.contains("no_such_function"));
        }
        other => panic!("expected fatal, got {other}"),
    }
}

#[test]
fn deadline_exceeded() {
    let (writer, _handle) = CollectOutput::new();
    let limits = ResourceLimits::unlimited().max_duration(std::time::Duration::from_millis(100));
    let mut global = Global::with_limits(Box::new(writer), limits);
    let result = global.run_source("spin.php", b"<?php while (true) {}");
    match result.unwrap_err() {
        RequestError::Fatal(fatal) => {
            assert_eq!(fatal.kind, FatalKind::Timeout);
            assert!(fatal.message.contains("Maximum execution time"));
        }
        other => panic!("expected timeout, got {other}"),
    }
}

#[test]
fn memory_limit_exceeded() {
    let (writer, _handle) = CollectOutput::new();
    let limits = ResourceLimits::unlimited().max_memory(4096);
    let mut global = Global::with_limits(Box::new(writer), limits);
    let result = global.run_source(
        "eat.php",
        br#"<?php $s = "x"; while (true) { $s = $s . $s; }"#,
    );
    match result.unwrap_err() {
        RequestError::Fatal(fatal) => {
            assert_eq!(fatal.kind, FatalKind::OutOfMemory);
            assert!(fatal.message.contains("Allowed memory size"));
        }
        other => panic!("expected out-of-memory, got {other}"),
    }
}

#[test]
fn exit_code_propagates() {
    let (result, output) = run(r"<?php echo 'x'; exit(3); echo 'y';");
    assert_eq!(result.unwrap(), 3);
    assert_eq!(output, "x");
}

#[test]
fn exit_with_message_echoes() {
    let (result, output) = run(r"<?php exit('bye');");
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "bye");
}

#[test]
fn compile_error_reports_location() {
    let (result, _) = run("<?php if (");
    match result.unwrap_err() {
        RequestError::Script(err) => assert_eq!(&*err.loc().filename, "test.php"),
        other => panic!("expected script error, got {other}"),
    }
}

#[test]
fn lex_error_reports_location() {
    let (result, _) = run("<?php 'unterminated");
    assert!(matches!(
        result.unwrap_err(),
        RequestError::Script(amphora::ScriptError::Lex(_))
    ));
}

#[test]
fn string_interpolation() {
    let output = run_ok("<?php $name = \"world\"; echo \"Hello $name!\\n\";");
    assert_eq!(output, "Hello world!\n");
}

#[test]
fn heredoc_interpolation() {
    let output = run_ok("<?php $n = 3;\n$s = <<<TXT\ncount: $n\nTXT;\necho $s;");
    assert_eq!(output, "count: 3");
}

#[test]
fn control_flow_loops() {
    let output = run_ok(
        r"<?php
        $total = 0;
        for ($i = 0; $i < 5; $i++) {
            if ($i == 3) {
                continue;
            }
            $total += $i;
        }
        $j = 0;
        while (true) {
            $j++;
            if ($j >= 2) {
                break;
            }
        }
        do {
            $j++;
        } while (false);
        echo $total, ':', $j;
        ",
    );
    assert_eq!(output, "7:3");
}

#[test]
fn nested_break_depth() {
    let output = run_ok(
        r"<?php
        foreach ([1, 2] as $a) {
            foreach ([10, 20] as $b) {
                echo $a * $b, ';';
                if ($b == 20) {
                    break 2;
                }
            }
        }
        echo 'done';
        ",
    );
    assert_eq!(output, "10;20;done");
}

#[test]
fn foreach_preserves_insertion_order() {
    let output = run_ok(
        r#"<?php
        $a = ["z" => 1];
        $a[5] = 2;
        $a["a"] = 3;
        foreach ($a as $k => $v) {
            echo $k, "=", $v, ";";
        }
        "#,
    );
    assert_eq!(output, "z=1;5=2;a=3;");
}

#[test]
fn foreach_by_reference_writes_back() {
    let output = run_ok(
        r"<?php
        $a = [1, 2, 3];
        foreach ($a as &$v) {
            $v = $v * 2;
        }
        echo $a[0], $a[1], $a[2];
        ",
    );
    assert_eq!(output, "246");
}

#[test]
fn switch_fallthrough_and_default() {
    let output = run_ok(
        r"<?php
        function pick($x) {
            switch ($x) {
                case 1:
                case 2:
                    return 'low';
                case '3':
                    return 'three';
                default:
                    return 'other';
            }
        }
        echo pick(2), ',', pick(3), ',', pick(9);
        ",
    );
    // '3' matches 3 by loose comparison
    assert_eq!(output, "low,three,other");
}

#[test]
fn closures_capture_by_value_and_reference() {
    let output = run_ok(
        r"<?php
        $y = 10;
        $add = function ($x) use ($y) {
            return $x + $y;
        };
        $y = 99;
        echo $add(5), ';';
        $n = 0;
        $inc = function () use (&$n) {
            $n++;
        };
        $inc();
        $inc();
        echo $n;
        ",
    );
    assert_eq!(output, "15;2");
}

#[test]
fn variable_variables() {
    let output = run_ok(r#"<?php $x = "y"; $$x = 7; echo $y;"#);
    assert_eq!(output, "7");
}

#[test]
fn static_function_variables_persist() {
    let output = run_ok(
        r"<?php
        function counter() {
            static $n = 0;
            $n++;
            return $n;
        }
        echo counter(), counter(), counter();
        ",
    );
    assert_eq!(output, "123");
}

#[test]
fn global_statement_binds_to_global_scope() {
    let output = run_ok(
        r"<?php
        $g = 5;
        function touch_global() {
            global $g;
            $g = $g + 1;
        }
        touch_global();
        echo $g;
        ",
    );
    assert_eq!(output, "6");
}

#[test]
fn class_constants_resolve_forward() {
    let output = run_ok(
        r"<?php
        class A {
            const X = B::Y + 1;
        }
        class B {
            const Y = 41;
        }
        echo A::X;
        ",
    );
    assert_eq!(output, "42");
}

#[test]
fn constant_lookup_searches_ancestors_and_interfaces() {
    let output = run_ok(
        r"<?php
        interface HasLimit {
            const LIMIT = 10;
        }
        class Base {
            const NAME = 'base';
        }
        class Child extends Base implements HasLimit {}
        echo Child::NAME, ':', Child::LIMIT;
        ",
    );
    assert_eq!(output, "base:10");
}

#[test]
fn instanceof_interfaces() {
    let output = run_ok(
        r"<?php
        interface I {}
        class A implements I {}
        class B {}
        $a = new A();
        $b = new B();
        var_dump($a instanceof I);
        var_dump($b instanceof I);
        ",
    );
    assert_eq!(output, "bool(true)\nbool(false)\n");
}

#[test]
fn parent_method_dispatch() {
    let output = run_ok(
        r"<?php
        class A {
            public function hi() {
                return 'A';
            }
        }
        class B extends A {
            public function hi() {
                return parent::hi() . 'B';
            }
        }
        $b = new B();
        echo $b->hi();
        ",
    );
    assert_eq!(output, "AB");
}

#[test]
fn property_defaults_apply_root_to_leaf() {
    let output = run_ok(
        r"<?php
        class A {
            public $x = 1;
            public $y = 2;
        }
        class B extends A {
            public $y = 3;
        }
        $b = new B();
        echo $b->x, $b->y;
        ",
    );
    assert_eq!(output, "13");
}

#[test]
fn constructor_by_class_base_name() {
    let output = run_ok(
        r"<?php
        class Legacy {
            public $ok = 0;
            public function legacy() {
                $this->ok = 1;
            }
        }
        $l = new Legacy();
        echo $l->ok;
        ",
    );
    assert_eq!(output, "1");
}

#[test]
fn static_properties_are_shared() {
    let output = run_ok(
        r"<?php
        class Counter {
            public static $n = 0;
            public static function bump() {
                self::$n++;
            }
        }
        Counter::bump();
        Counter::bump();
        echo Counter::$n;
        ",
    );
    assert_eq!(output, "2");
}

#[test]
fn output_buffering_is_lifo() {
    let output = run_ok(
        r"<?php
        echo 'a';
        ob_start();
        echo 'b';
        ob_start();
        echo 'c';
        ob_end_flush();
        $s = ob_get_clean();
        echo $s;
        ",
    );
    assert_eq!(output, "abc");
}

#[test]
fn duplicate_class_is_fatal() {
    let (result, _) = run(r"<?php class A {} class A {}");
    match result.unwrap_err() {
        RequestError::Fatal(fatal) => {
            assert_eq!(fatal.kind, FatalKind::DuplicateClass);
            assert!(fatal.message.contains("Cannot declare class A"));
        }
        other => panic!("expected duplicate-class fatal, got {other}"),
    }
}

#[test]
fn include_runs_in_same_global() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("amphora_inc_{}.php", std::process::id()));
    std::fs::write(&path, b"<?php $shared = 11; echo 'inc;';").unwrap();
    let source = format!("<?php include '{}'; echo $shared;", path.display());
    let output = run_ok(&source);
    std::fs::remove_file(&path).ok();
    assert_eq!(output, "inc;11");
}

#[test]
fn include_once_runs_at_most_once() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("amphora_once_{}.php", std::process::id()));
    std::fs::write(&path, b"<?php echo 'x';").unwrap();
    let source = format!(
        "<?php include_once '{p}'; include_once '{p}';",
        p = path.display()
    );
    let output = run_ok(&source);
    std::fs::remove_file(&path).ok();
    assert_eq!(output, "x");
}

#[test]
fn missing_require_is_fatal_missing_include_warns() {
    let (result, _) = run(r"<?php require '/no/such/file.php';");
    match result.unwrap_err() {
        RequestError::Fatal(fatal) => assert_eq!(fatal.kind, FatalKind::RequireFailed),
        other => panic!("expected require failure, got {other}"),
    }

    let (result, output) = run(r"<?php $r = include '/no/such/file.php'; var_dump($r);");
    assert_eq!(result.unwrap(), 0);
    assert!(output.contains("Warning"));
    assert!(output.contains("bool(false)"));
}

#[test]
fn include_return_value() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("amphora_ret_{}.php", std::process::id()));
    std::fs::write(&path, b"<?php return 42;").unwrap();
    let source = format!("<?php echo include '{}';", path.display());
    let output = run_ok(&source);
    std::fs::remove_file(&path).ok();
    assert_eq!(output, "42");
}

#[test]
fn undefined_variable_notices_and_continues() {
    let (result, output) = run(r"<?php echo $nope; echo 'after';");
    assert_eq!(result.unwrap(), 0);
    assert!(output.contains("Notice: Undefined variable: nope"));
    assert!(output.ends_with("after"));
}

#[test]
fn finally_always_runs() {
    let output = run_ok(
        r"<?php
        function f() {
            try {
                throw new Exception('x');
            } catch (Exception $e) {
                return 'caught';
            } finally {
                echo 'finally;';
            }
        }
        echo f();
        ",
    );
    assert_eq!(output, "finally;caught");
}

#[test]
fn ternary_and_coalesce() {
    let output = run_ok(
        r"<?php
        $a = null;
        echo $a ?? 'fallback', ';';
        echo isset($undefined) ? 'set' : 'unset', ';';
        $b = 0 ?: 'zero';
        echo $b;
        ",
    );
    assert_eq!(output, "fallback;unset;zero");
}

#[test]
fn ternary_is_left_associative() {
    // `a ? b : c ? d : e` groups as `(a ? b : c) ? d : e`
    let output = run_ok(r"<?php echo true ? 'a' : false ? 'b' : 'c';");
    assert_eq!(output, "b");
}

#[test]
fn integer_division_overflow_promotes_to_float() {
    let output = run_ok(r"<?php var_dump(PHP_INT_MIN / -1);");
    assert_eq!(output, "float(9.223372036854776E+18)\n");
}

#[test]
fn negative_shift_count_throws_arithmetic_error() {
    let output = run_ok(
        r"<?php
        try {
            echo 1 << -1;
        } catch (ArithmeticError $e) {
            echo 'caught: ', $e->getMessage();
        }
        try {
            echo 8 >> -2;
        } catch (ArithmeticError $e) {
            echo ';again';
        }
        ",
    );
    assert_eq!(output, "caught: Bit shift by negative number;again");
}

#[test]
fn casts() {
    let output = run_ok(
        r#"<?php
        echo (int) "42abc", ';';
        echo (float) "1.5", ';';
        echo (string) true, ';';
        echo (bool) "0" ? 't' : 'f', ';';
        $a = (array) 'solo';
        echo $a[0];
        "#,
    );
    assert_eq!(output, "42;1.5;1;f;solo");
}

#[test]
fn variadic_parameters_collect_rest() {
    let output = run_ok(
        r"<?php
        function tally($first, ...$rest) {
            return $first + count($rest);
        }
        echo tally(10, 'a', 'b', 'c');
        ",
    );
    assert_eq!(output, "13");
}

#[test]
fn default_parameters_are_delayed() {
    let output = run_ok(
        r"<?php
        function width($w = Config::WIDTH) {
            return $w;
        }
        class Config {
            const WIDTH = 80;
        }
        echo width(), ':', width(10);
        ",
    );
    assert_eq!(output, "80:10");
}
