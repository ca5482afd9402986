//! Certification tests for kiln
//!
//! Uses cucumber features to verify compiler semantics end to end.

use cucumber::{given, then, when, World};
use kiln::CompileOptions;
use kiln_cert::{disassemble, evaluate, Outcome};

#[derive(Debug, Default, World)]
pub struct KilnWorld {
    /// Accumulated definitions
    source: String,
    options: CompileOptions,
    outcome: Outcome,
    kir: Option<String>,
}

impl KilnWorld {
    fn value(&self) -> &str {
        if let Some(ref err) = self.outcome.error {
            panic!("evaluation failed: {}", err);
        }
        self.outcome.value.as_deref().expect("No result")
    }
}

// --- Step Definitions ---

#[given(regex = "^the definition (.*)$")]
async fn given_definition(world: &mut KilnWorld, source: String) {
    world.source.push_str(&source);
    world.source.push('\n');
}

#[given("reflection warnings are enabled")]
async fn given_warn_on_reflection(world: &mut KilnWorld) {
    world.options.warn_on_reflection = true;
}

#[given("boxing warnings are enabled")]
async fn given_warn_on_boxing(world: &mut KilnWorld) {
    world.options.warn_on_boxing = true;
}

#[given("strict mode")]
async fn given_strict(world: &mut KilnWorld) {
    world.options.strict = true;
}

#[given("locals clearing is disabled")]
async fn given_no_clearing(world: &mut KilnWorld) {
    world.options.disable_locals_clearing = true;
}

#[when(regex = "^I evaluate (.*)$")]
async fn when_evaluate(world: &mut KilnWorld, expr: String) {
    world.outcome = evaluate(&world.source, &expr, world.options.clone());
}

#[when(regex = "^I compile (.*)$")]
async fn when_compile(world: &mut KilnWorld, expr: String) {
    match disassemble(&world.source, &expr, world.options.clone()) {
        Ok(kir) => world.kir = Some(kir),
        Err(e) => panic!("compilation failed: {}", e),
    }
}

#[then(regex = "^the result is (.*)$")]
async fn then_result_is(world: &mut KilnWorld, expected: String) {
    let actual = world.value();
    assert_eq!(actual, expected, "Expected {} but got {}", expected, actual);
}

#[then(regex = "^it fails with (\\w+): (.*)$")]
async fn then_fails_with(world: &mut KilnWorld, kind: String, message: String) {
    let err = world.outcome.error.as_deref().expect("expected a failure");
    let expected = format!("{}: {}", kind, message);
    assert!(err.starts_with(&expected), "Expected {} but got {}", expected, err);
}

#[then(regex = "^a warning containing \"(.*)\" is reported$")]
async fn then_warning(world: &mut KilnWorld, text: String) {
    assert!(
        world.outcome.warnings.iter().any(|w| w.contains(&text)),
        "no warning containing {:?} in {:?}",
        text,
        world.outcome.warnings
    );
}

#[then("no warning is reported")]
async fn then_no_warning(world: &mut KilnWorld) {
    assert!(world.outcome.warnings.is_empty(), "{:?}", world.outcome.warnings);
}

#[then(regex = "^the kIR contains \"(.*)\"$")]
async fn then_kir_contains(world: &mut KilnWorld, text: String) {
    let kir = world.kir.as_deref().expect("nothing compiled");
    assert!(kir.contains(&text), "{:?} not in\n{}", text, kir);
}

#[then(regex = "^the kIR does not contain \"(.*)\"$")]
async fn then_kir_lacks(world: &mut KilnWorld, text: String) {
    let kir = world.kir.as_deref().expect("nothing compiled");
    assert!(!kir.contains(&text), "{:?} found in\n{}", text, kir);
}

#[tokio::main]
async fn main() {
    KilnWorld::run("features").await;
}
