fn main() {
    // Load .env file for WiFi configuration
    load_env_config();

    // Host builds (unit tests, tooling) must not see the ESP linker scripts
    let target_arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    if target_arch == "riscv32" {
        linker_be_nice();
        // make sure linkall.x is the last linker script (otherwise might cause problems with flip-link)
        println!("cargo:rustc-link-arg=-Tlinkall.x");
    }
}

/// Load WiFi credentials from the environment or a .env file.
/// Environment variables take priority over .env file values.
fn load_env_config() {
    use std::env;
    use std::path::Path;

    println!("cargo:rerun-if-changed=.env");
    println!("cargo:rerun-if-env-changed=WIFI_SSID");
    println!("cargo:rerun-if-env-changed=WIFI_PASSWORD");

    if Path::new(".env").exists() {
        if let Err(e) = dotenvy::dotenv() {
            println!("cargo:warning=Failed to load .env file: {}", e);
        }
    }

    let wifi_ssid = env::var("WIFI_SSID").unwrap_or_default().trim().to_string();
    let wifi_password = env::var("WIFI_PASSWORD")
        .unwrap_or_default()
        .trim()
        .to_string();

    // Always defined so `env!` in the library resolves on every target
    println!("cargo:rustc-env=WIFI_SSID={}", wifi_ssid);
    println!("cargo:rustc-env=WIFI_PASSWORD={}", wifi_password);

    if wifi_ssid.is_empty() && target_is_board() {
        println!("cargo:warning=WIFI_SSID is empty - network transport will stay offline");
    }
}

fn target_is_board() -> bool {
    std::env::var("CARGO_CFG_TARGET_ARCH").is_ok_and(|arch| arch == "riscv32")
}

fn linker_be_nice() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        let kind = &args[1];
        let what = &args[2];

        match kind.as_str() {
            "undefined-symbol" => match what.as_str() {
                "_stack_start" => {
                    eprintln!();
                    eprintln!("💡 Is the linker script `linkall.x` missing?");
                    eprintln!();
                }
                "esp_wifi_preempt_enable"
                | "esp_wifi_preempt_yield_task"
                | "esp_wifi_preempt_task_create" => {
                    eprintln!();
                    eprintln!("💡 `esp-wifi` has no scheduler enabled. Make sure you have the `builtin-scheduler` feature enabled, or that you provide an external scheduler.");
                    eprintln!();
                }
                _ => (),
            },
            _ => {
                std::process::exit(1);
            }
        }

        std::process::exit(0);
    }

    if let Ok(exe) = std::env::current_exe() {
        println!(
            "cargo:rustc-link-arg=--error-handling-script={}",
            exe.display()
        );
    }
}
