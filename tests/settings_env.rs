// tests/settings_env.rs
use reddit_discord_relay::config::relay::ENV_CONFIG_PATH;
use reddit_discord_relay::Settings;
use std::time::Duration;
use std::{env, fs};

const VARS: [&str; 5] = [
    "DISCORD_TOKEN",
    "DISCORD_POST_CHANNEL",
    "CHECK_INTERVAL",
    "TARGET_FLAIRS",
    ENV_CONFIG_PATH,
];

fn clear() {
    for v in VARS {
        env::remove_var(v);
    }
}

#[serial_test::serial]
#[test]
fn from_env_reads_overlay_in_order() {
    // keep the repo's own config/ out of the picture
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear();

    env::set_var("DISCORD_TOKEN", "t");
    env::set_var("DISCORD_POST_CHANNEL", "42");
    env::set_var("CHECK_INTERVAL", "300");
    env::set_var("TARGET_FLAIRS", "Funny");

    // 1) env only
    let s = Settings::from_env().unwrap();
    assert_eq!(s.post_channel, 42);
    assert_eq!(s.interval, Duration::from_secs(300));
    assert_eq!(s.flairs, vec!["Funny"]);

    // 2) ./config/relay.toml is picked up when present
    fs::create_dir_all(tmp.path().join("config")).unwrap();
    fs::write(tmp.path().join("config/relay.toml"), "flairs = [\"Serious\"]\n").unwrap();
    let s = Settings::from_env().unwrap();
    assert_eq!(s.flairs, vec!["Serious"]);
    assert_eq!(s.interval, Duration::from_secs(300));

    // 3) explicit path wins over the default location
    let explicit = tmp.path().join("other.toml");
    fs::write(&explicit, "interval_secs = 900\npost_limit = 2\n").unwrap();
    env::set_var(ENV_CONFIG_PATH, explicit.display().to_string());
    let s = Settings::from_env().unwrap();
    assert_eq!(s.interval, Duration::from_secs(900));
    assert_eq!(s.post_limit, 2);
    assert_eq!(s.flairs, vec!["Funny"]);

    // 4) a dangling explicit path is an error
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
    assert!(Settings::from_env().is_err());

    clear();
    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn missing_token_fails_fast() {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear();

    env::set_var("DISCORD_POST_CHANNEL", "42");
    let err = Settings::from_env().unwrap_err();
    assert!(err.to_string().contains("DISCORD_TOKEN"));

    clear();
    env::set_current_dir(&old).unwrap();
}
