//! Shipped scenario catalogue
//!
//! Run with: cargo test --package chatbattles-e2e --test scenarios

use std::path::PathBuf;

use chatbattles_e2e::{Locator, Scenario, ScenarioRunner, Step, VerifyStyle};

fn catalogue() -> Vec<Scenario> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios");
    Scenario::load_all(&dir).expect("catalogue parses")
}

fn find<'a>(all: &'a [Scenario], name: &str) -> &'a Scenario {
    all.iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| panic!("{} missing from catalogue", name))
}

fn xpath(path: &str) -> Locator {
    Locator::XPath(path.to_string())
}

#[test]
fn every_scenario_loads() {
    let all = catalogue();
    let names: Vec<_> = all.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "TC001", "TC003", "TC004", "TC006", "TC007", "TC013", "TC014", "TC017", "TC018",
            "TC020", "TC021", "TC022", "TC024", "TC025",
        ]
    );
    for scenario in &all {
        assert_eq!(scenario.start_url, "/", "{}", scenario.name);
        assert_eq!(scenario.linger_ms, 5000, "{}", scenario.name);
        assert!(!scenario.tags.is_empty(), "{}", scenario.name);
    }
}

#[test]
fn soft_scenarios_carry_one_target_and_a_message() {
    for scenario in catalogue() {
        if scenario.verify.style == VerifyStyle::Soft {
            assert_eq!(scenario.verify.visible.len(), 1, "{}", scenario.name);
            assert!(scenario.verify.message.is_some(), "{}", scenario.name);
        }
    }
}

#[test]
fn sign_up_flow() {
    let all = catalogue();
    let tc001 = find(&all, "TC001");

    assert_eq!(tc001.steps.len(), 11);
    assert_eq!(
        tc001.steps[0],
        Step::Click {
            locator: xpath("html/body/div[2]/nav/div/div/div/div/a[2]"),
            timeout_ms: None,
            note: Some("Click on the 'Sign Up' link to go to the sign-up page".into()),
        }
    );
    match &tc001.steps[1] {
        Step::Fill { locator, value, .. } => {
            assert_eq!(
                *locator,
                xpath("html/body/div[3]/div[2]/div/div/div/div[2]/form/div/div/div/div/input")
            );
            assert_eq!(value, "palbiraj4@gmail.com");
        }
        other => panic!("unexpected step {:?}", other),
    }

    let clears = tc001
        .steps
        .iter()
        .filter(|s| matches!(s, Step::Fill { value, .. } if value.is_empty()))
        .count();
    assert_eq!(clears, 2);

    assert_eq!(tc001.verify.style, VerifyStyle::Soft);
    assert_eq!(tc001.verify.timeout_ms, 1000);
    assert_eq!(
        tc001.verify.visible,
        [Locator::Text("Sign-up Successful! Welcome to Battle Mode".into())]
    );
    assert_eq!(
        tc001.verify.message.as_deref(),
        Some(
            "Test case failed: The sign-up process did not complete successfully. The user was \
             not redirected to the authenticated landing page or Battle Mode interface, and the \
             user session was not established as expected."
        )
    );
}

#[test]
fn invalid_credentials_flow_checks_every_target() {
    let all = catalogue();
    let tc003 = find(&all, "TC003");

    assert_eq!(tc003.steps.len(), 9);
    assert_eq!(tc003.verify.style, VerifyStyle::Hard);
    assert_eq!(tc003.verify.timeout_ms, 30_000);
    assert_eq!(tc003.verify.message, None);

    let targets: Vec<String> = tc003.verify.visible.iter().map(|l| l.to_string()).collect();
    assert_eq!(
        targets,
        [
            "text=Check your email",
            "text=to continue to",
            "text=palbiraj4@gmail.com",
            "text=Enter code.",
            "text=Didn't receive a code? Resend",
            "text=Continue",
            "text=Use another method",
        ]
    );
}

#[test]
fn protected_routes_navigate_then_scroll() {
    let all = catalogue();
    let tc017 = find(&all, "TC017");

    let urls: Vec<&str> = tc017
        .steps
        .iter()
        .filter_map(|s| match s {
            Step::Navigate { url, pause_ms, .. } => {
                assert_eq!(*pause_ms, Some(3000));
                Some(url.as_str())
            }
            _ => None,
        })
        .collect();
    assert_eq!(urls, ["/battle-mode", "/profile", "/battle"]);
    assert!(matches!(
        tc017.steps.last(),
        Some(Step::Scroll { delta_y: None, .. })
    ));
    assert_eq!(tc017.verify.timeout_ms, 3000);
}

#[test]
fn tag_selection_over_catalogue() {
    let auth = ScenarioRunner::select(catalogue(), Some("auth"), &[]).unwrap();
    let names: Vec<_> = auth.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["TC001", "TC003", "TC017"]);
}
