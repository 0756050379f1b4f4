//! End-to-end execution through the real Python interpreter. Every test
//! returns early when python3 is not on PATH.
mod common;

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use bindkit::{events::EventBus, executor::ScriptExecutor, loader::ScriptLoader};
use common::{python3, settings, write_script};
use serde_json::Value;
use tempfile::tempdir;

fn harness(dir: &std::path::Path) -> (ScriptExecutor, ScriptLoader) {
    let settings = settings(dir);
    let executor = ScriptExecutor::with_log_dir(
        settings.clone(),
        EventBus::new(),
        dir.join("logs/services"),
    );
    let loader = ScriptLoader::new(dir.join("scripts"), settings);
    (executor, loader)
}

#[test]
fn json_stdout_overlays_success_and_message() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    write_script(
        temp.path(),
        "hello.py",
        "if __name__ == \"__main__\":\n    print('{\"success\": true, \"message\": \"hi\"}')\n",
    );
    let (executor, mut loader) = harness(temp.path());
    loader.discover();

    let script = loader.get("hello.py").unwrap();
    let result = executor.execute(&script, &BTreeMap::new());

    assert!(result.success, "{}", result.error);
    assert_eq!(result.message, "hi");
    assert_eq!(result.return_code, Some(0));
    assert_eq!(result.output, "{\"success\": true, \"message\": \"hi\"}");
}

#[test]
fn failing_json_overlay_controls_success() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    write_script(
        temp.path(),
        "sad.py",
        "if __name__ == \"__main__\":\n    print('{\"success\": false, \"message\": \"x\"}')\n",
    );
    let (executor, mut loader) = harness(temp.path());
    loader.discover();

    let script = loader.get("sad.py").unwrap();
    let result = executor.execute(&script, &BTreeMap::new());

    // The process exited cleanly; the overlay alone flips the outcome.
    assert!(!result.success);
    assert_eq!(result.message, "x");
    assert_eq!(result.return_code, Some(0));
}

#[test]
fn missing_required_argument_fails_without_spawning() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    // The script would create a marker file if it ever ran.
    let marker = temp.path().join("ran.txt");
    write_script(
        temp.path(),
        "strict.py",
        &format!(
            concat!(
                "import argparse\n",
                "open(r'{}', 'w').write('ran')\n",
                "parser = argparse.ArgumentParser()\n",
                "parser.add_argument('--name', required=True)\n",
                "parser.parse_args()\n",
            ),
            marker.display()
        ),
    );
    let (executor, mut loader) = harness(temp.path());
    loader.discover();

    let script = loader.get("strict.py").unwrap();
    let result = executor.execute(&script, &BTreeMap::new());

    assert!(!result.success);
    assert!(result.error.contains("name"));
    assert!(!marker.exists(), "no process may be spawned");
}

#[test]
fn declared_arguments_reach_the_command_line() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    write_script(
        temp.path(),
        "echo_args.py",
        concat!(
            "import argparse, json\n",
            "parser = argparse.ArgumentParser()\n",
            "parser.add_argument('--device', required=True)\n",
            "parser.add_argument('--volume', type=int, default=5)\n",
            "args = parser.parse_args()\n",
            "print(json.dumps({'success': True, 'message': f'{args.device}:{args.volume}'}))\n",
        ),
    );
    let (executor, mut loader) = harness(temp.path());
    loader.discover();

    let script = loader.get("echo_args.py").unwrap();
    let mut arguments = BTreeMap::new();
    arguments.insert("device".to_string(), "headset".to_string());
    arguments.insert("volume".to_string(), "11".to_string());

    let result = executor.execute(&script, &arguments);
    assert!(result.success, "{}", result.error);
    assert_eq!(result.message, "headset:11");
}

#[test]
fn choice_and_type_violations_are_validation_errors() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    write_script(
        temp.path(),
        "picky.py",
        concat!(
            "import argparse\n",
            "parser = argparse.ArgumentParser()\n",
            "parser.add_argument('--mode', choices=['fast', 'slow'])\n",
            "parser.add_argument('--count', type=int)\n",
            "parser.parse_args()\n",
        ),
    );
    let (executor, mut loader) = harness(temp.path());
    loader.discover();
    let script = loader.get("picky.py").unwrap();

    let mut arguments = BTreeMap::new();
    arguments.insert("mode".to_string(), "medium".to_string());
    arguments.insert("count".to_string(), "lots".to_string());

    let result = executor.execute(&script, &arguments);
    assert!(!result.success);
    assert!(result.error.contains("must be one of"));
    assert!(result.error.contains("integer"));
}

#[test]
fn sleeping_script_is_terminated_within_the_ladder() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    write_script(
        temp.path(),
        "sleepy.py",
        "import time\nif __name__ == \"__main__\":\n    time.sleep(30)\n",
    );
    let (executor, mut loader) = harness(temp.path());
    loader.settings().set(
        "execution/script_timeout_seconds",
        serde_json::Value::Number(2.into()),
    );
    loader.discover();

    let script = loader.get("sleepy.py").unwrap();
    let started = Instant::now();
    let result = executor.execute(&script, &BTreeMap::new());
    let elapsed = started.elapsed();

    assert!(!result.success);
    assert!(result.message.contains("timed out"));
    assert_ne!(result.return_code, Some(0));
    assert!(elapsed < Duration::from_secs(8), "took {elapsed:?}");
}

#[test]
fn function_strategy_converts_dict_returns() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    write_script(
        temp.path(),
        "funcy.py",
        concat!(
            "def main():\n",
            "    return {'success': True, 'message': 'toggled', 'level': 3}\n",
        ),
    );
    let (executor, mut loader) = harness(temp.path());
    loader.discover();

    let script = loader.get("funcy.py").unwrap();
    assert_eq!(
        script.strategy,
        bindkit::analyzer::ExecutionStrategy::InProcessFunction
    );

    let result = executor.execute(&script, &BTreeMap::new());
    assert!(result.success, "{}", result.error);
    assert_eq!(result.message, "toggled");
    assert_eq!(result.data.as_ref().unwrap()["level"], Value::from(3));

    // A second run goes through the cached module.
    let again = executor.execute(&script, &BTreeMap::new());
    assert!(again.success);
    assert!(executor.cache_stats().cached_modules >= 1);
}

#[test]
fn function_strategy_string_and_bool_returns() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    write_script(temp.path(), "texty.py", "def main():\n    return 'all good'\n");
    write_script(temp.path(), "nope.py", "def main():\n    return False\n");
    let (executor, mut loader) = harness(temp.path());
    loader.discover();

    let texty = executor.execute(&loader.get("texty.py").unwrap(), &BTreeMap::new());
    assert!(texty.success);
    assert_eq!(texty.message, "all good");

    let nope = executor.execute(&loader.get("nope.py").unwrap(), &BTreeMap::new());
    assert!(!nope.success);
    assert_eq!(nope.message, "Script execution failed");
}

#[test]
fn module_strategy_runs_whole_script() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    write_script(temp.path(), "plain.py", "x = 2 + 2\nprint('computed', x)\n");
    let (executor, mut loader) = harness(temp.path());
    loader.discover();

    let script = loader.get("plain.py").unwrap();
    assert_eq!(
        script.strategy,
        bindkit::analyzer::ExecutionStrategy::InProcessModule
    );

    let result = executor.execute(&script, &BTreeMap::new());
    assert!(result.success, "{}", result.error);
    assert_eq!(result.message, "Script executed successfully");
}

#[test]
fn shell_scripts_execute_under_bash() {
    if which::which("bash").is_err() {
        return;
    }
    let temp = tempdir().unwrap();
    write_script(temp.path(), "greet.sh", "echo \"hello $1\"\n");
    let (executor, mut loader) = harness(temp.path());
    // Force the native bash path rather than WSL probing.
    loader
        .settings()
        .set("interpreters/use_wsl", serde_json::Value::Bool(false));
    loader.discover();

    let script = loader.get("greet.sh").unwrap();
    let mut arguments = BTreeMap::new();
    arguments.insert("arg1".to_string(), "world".to_string());

    let result = executor.execute(&script, &arguments);
    assert!(result.success, "{}", result.error);
    assert_eq!(result.output, "hello world");
}
