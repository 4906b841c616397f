//! End-to-end behavioral scenarios, driven against a real `Context` and
//! asserted on the `CollectStringPrint` sink's captured output -- the
//! concrete scenarios spec.md §8 lists verbatim.

use pyra::{CollectStringPrint, Config, Context, ExcType, Value};

fn run(config: Config, source: &str) -> (Context, CollectStringPrint, pyra::RunResult<Value>) {
    let sink = CollectStringPrint::new();
    let mut ctx = Context::with_print(config, Box::new(sink.clone()));
    let result = ctx.run_source("<test>", source);
    (ctx, sink, result)
}

#[test]
fn scenario_1_print_hello() {
    let (_ctx, sink, result) = run(Config::default(), r#"print("hello")"#);
    result.unwrap();
    assert_eq!(sink.contents(), "hello\n");
}

#[test]
fn scenario_2_for_loop_accumulation() {
    let source = "x = 0\nfor i in range(10):\n    x += i\nprint(x)\n";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "45\n");
}

#[test]
fn scenario_3_try_except_clears_current_exception() {
    let source = "try:\n    raise ValueError(\"oops\")\nexcept ValueError as e:\n    print(str(e))\n";
    let (ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "oops\n");
    assert!(ctx.current_exception().is_none());
}

#[test]
fn scenario_4_multiple_inheritance_super_call() {
    let source = "\
class A:
    def f(self):
        return 1

class B(A):
    def f(self):
        return 2 + super(B, self).f()

print(B().f())
";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "3\n");
}

#[test]
fn scenario_5_dict_insertion_then_sorted_keys() {
    let source = "d = {\"a\": 1}\nd[\"b\"] = 2\nprint(sorted(d.keys()))\n";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "['a', 'b']\n");
}

#[test]
fn scenario_6_nonlocal_closure_shares_cell() {
    let source = "\
def f():
    x = 0
    def g():
        nonlocal x
        x += 1
        return x
    return g

g = f()
print(g())
print(g())
";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "1\n2\n");
}

#[test]
fn integer_floor_div_and_mod_satisfy_the_division_identity() {
    let source = "\
pairs = [(7, 2), (-7, 2), (7, -2), (-7, -2), (0, 5)]
for a, b in pairs:
    assert a == (a // b) * b + (a % b)
print(\"ok\")
";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "ok\n");
}

#[test]
fn string_slice_round_trips_for_every_split_point() {
    let source = "\
s = \"hello world\"
for i in range(len(s) + 1):
    assert s == s[:i] + s[i:]
print(\"ok\")
";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "ok\n");
}

#[test]
fn iteration_over_a_custom_iterator_raises_stop_iteration_exactly_once() {
    let source = "\
class Counter:
    def __init__(self, n):
        self.n = n
        self.i = 0

    def __iter__(self):
        return self

    def __next__(self):
        if self.i >= self.n:
            raise StopIteration
        self.i += 1
        return self.i

out = []
for v in Counter(3):
    out.append(v)
print(out)
";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "[1, 2, 3]\n");
}

#[test]
fn recursion_limit_succeeds_one_below_the_cap_and_fails_at_the_cap() {
    let config = Config {
        max_recursion: 50,
        ..Config::default()
    };
    let source = "\
def depth(n):
    if n <= 0:
        return 0
    return 1 + depth(n - 1)

print(depth(48))
";
    let (_ctx, sink, result) = run(config.clone(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "48\n");

    let overflow_source = "\
def depth(n):
    if n <= 0:
        return 0
    return 1 + depth(n - 1)

depth(100)
";
    let (ctx, _sink, result) = run(config, overflow_source);
    let err = result.expect_err("expected a recursion error");
    assert!(err.matches(ctx.heap(), ExcType::RecursionError));
}

#[test]
fn dict_write_then_read_observes_the_latest_value() {
    let source = "\
d = {}
d[\"k\"] = 1
d[\"k\"] = 2
print(d[\"k\"])
";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "2\n");
}

#[test]
fn uncaught_exception_leaves_current_exception_set_with_a_captured_trace() {
    let source = "raise ValueError(\"boom\")\n";
    let (ctx, _sink, result) = run(Config::default(), source);
    let err = result.expect_err("expected a propagating ValueError");
    assert!(err.matches(ctx.heap(), ExcType::ValueError));
    assert_eq!(err.message(ctx.heap()), "boom");
}

#[test]
fn comprehension_desugars_to_a_filtered_fresh_list() {
    let source = "print([x * x for x in range(6) if x % 2 == 0])\n";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "[0, 4, 16]\n");
}

#[test]
fn with_statement_calls_enter_and_exit_even_on_early_return() {
    let source = "\
class Resource:
    def __init__(self):
        self.entered = False
        self.exited = False

    def __enter__(self):
        self.entered = True
        return self

    def __exit__(self, exc_type, exc, tb):
        self.exited = True

r = Resource()
with r as handle:
    pass
print(handle.entered, handle.exited)
";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "True True\n");
}

#[test]
fn compound_assignment_desugars_through_the_augmented_target() {
    let source = "\
x = 5
x += 3
x *= 2
print(x)
";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "16\n");
}

#[test]
fn identity_never_aliases_across_kinds() {
    let source = "\
ids = [id(None), id(False), id(True), id(0), id(1), id(0.0)]
print(len(ids) == len(set(ids)))
";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "True\n");
}

#[test]
fn int_of_an_out_of_range_literal_raises_overflow_error_not_value_error() {
    let source = "int(\"99999999999999999999999999999999\")\n";
    let (ctx, _sink, result) = run(Config::default(), source);
    let err = result.expect_err("expected an OverflowError");
    assert!(err.matches(ctx.heap(), ExcType::OverflowError));
}

#[test]
fn int_of_a_malformed_literal_still_raises_value_error() {
    let source = "int(\"not a number\")\n";
    let (ctx, _sink, result) = run(Config::default(), source);
    let err = result.expect_err("expected a ValueError");
    assert!(err.matches(ctx.heap(), ExcType::ValueError));
}

#[test]
fn power_of_a_huge_exponent_raises_overflow_error_instead_of_panicking() {
    let source = "2 ** 1000\n";
    let (ctx, _sink, result) = run(Config::default(), source);
    let err = result.expect_err("expected an OverflowError");
    assert!(err.matches(ctx.heap(), ExcType::OverflowError));
}

#[test]
fn list_comparison_orders_strings_lexicographically_not_as_always_equal() {
    let source = "print([\"a\", \"b\"] < [\"a\", \"c\"])\n";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "True\n");
}

#[test]
fn list_comparison_detects_inequality_of_nested_tuples() {
    let source = "print([(1, \"a\")] < [(1, \"b\")])\n";
    let (_ctx, sink, result) = run(Config::default(), source);
    result.unwrap();
    assert_eq!(sink.contents(), "True\n");
}
