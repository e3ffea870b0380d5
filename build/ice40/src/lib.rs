// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build-time support for boards carrying an iCE40.
//!
//! A board describes its FPGA wiring in an `[ice40]` table of its task
//! configuration:
//!
//! ```toml
//! [ice40]
//! bus = 2
//! cs = 5
//! done = 6
//! reset = 7
//! clock-hz-full-duplex = 10_000_000
//! clock-hz-half-duplex = 20_000_000
//! max-transfer-size = 4092
//! ```
//!
//! and its `build.rs` calls [`generate`], then `include!`s the result to get
//! a `const` [`Config`] for the driver. The configuration is checked here with
//! the same rules the driver applies at init, so a board that could never
//! come up fails to build instead.

use anyhow::{anyhow, bail, Context, Result};
use drv_ice40_api::{Config, ConfigError, Pin};
use proc_macro2::TokenStream;
use quote::{quote, ToTokens, TokenStreamExt};
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable the build system puts the task configuration in.
pub const TASK_CONFIG_VAR: &str = "HUBRIS_TASK_CONFIG";

/// Name of the constant written by [`generate`].
pub const CONFIG_CONST: &str = "ICE40_CONFIG";

/// Our subset of the task config. This must not be `deny_unknown_fields`,
/// since the task config has plenty of other things in it; `Config` itself
/// is strict.
#[derive(Deserialize)]
struct TaskConfig {
    ice40: Config,
}

/// Parses a task configuration document and checks the `[ice40]` table in it.
pub fn parse(text: &str) -> Result<Config> {
    let doc: TaskConfig =
        toml::from_str(text).context("parsing iCE40 task configuration")?;
    check(&doc.ice40)?;
    Ok(doc.ice40)
}

fn describe(e: ConfigError) -> &'static str {
    match e {
        ConfigError::NoChipSelect => "no chip select pin (`cs`) given",
        ConfigError::ZeroTransferSize => "`max-transfer-size` must be nonzero",
        ConfigError::NoDoneSignal => "no CDONE source",
        ConfigError::NoResetSignal => "no CRESET_B source",
    }
}

fn check(config: &Config) -> Result<()> {
    config
        .validate()
        .map_err(|e| anyhow!("invalid iCE40 config: {}", describe(e)))?;

    if config.clock_hz_full_duplex == 0 || config.clock_hz_half_duplex == 0 {
        bail!("invalid iCE40 config: SPI clocks must be nonzero");
    }
    if config.clock_hz_turbo == Some(0) {
        bail!("invalid iCE40 config: turbo clock must be nonzero if given");
    }

    let pins = [
        ("cs", config.cs),
        ("done", config.done),
        ("reset", config.reset),
        ("int", config.int),
    ];
    for (i, (a, pa)) in pins.iter().enumerate() {
        for (b, pb) in &pins[i + 1..] {
            if let (Some(Pin(pa)), Some(Pin(pb))) = (pa, pb) {
                if pa == pb {
                    bail!(
                        "invalid iCE40 config: pin {pa} used for both \
                         `{a}` and `{b}`"
                    );
                }
            }
        }
    }
    Ok(())
}

struct OptionalPin(Option<Pin>);

impl ToTokens for OptionalPin {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        tokens.append_all(match self.0 {
            Some(Pin(n)) => quote! { Some(drv_ice40_api::Pin(#n)) },
            None => quote! { None },
        });
    }
}

/// Produces `pub const NAME: drv_ice40_api::Config = ...;` for `config`.
pub fn codegen(name: &str, config: &Config) -> Result<TokenStream> {
    let name: syn::Ident = syn::parse_str(name)
        .with_context(|| format!("`{name}` is not an identifier"))?;

    let bus = config.bus;
    let cs = OptionalPin(config.cs);
    let done = OptionalPin(config.done);
    let reset = OptionalPin(config.reset);
    let int = OptionalPin(config.int);
    let full = config.clock_hz_full_duplex;
    let half = config.clock_hz_half_duplex;
    let turbo = match config.clock_hz_turbo {
        Some(hz) => quote! { Some(#hz) },
        None => quote! { None },
    };
    let input_delay_ns = config.input_delay_ns;
    let max_transfer_size = config.max_transfer_size;

    Ok(quote! {
        pub const #name: drv_ice40_api::Config = drv_ice40_api::Config {
            bus: #bus,
            cs: #cs,
            done: #done,
            reset: #reset,
            int: #int,
            clock_hz_full_duplex: #full,
            clock_hz_half_duplex: #half,
            clock_hz_turbo: #turbo,
            input_delay_ns: #input_delay_ns,
            max_transfer_size: #max_transfer_size,
        };
    })
}

/// Like [`codegen`], but formatted as a source file.
pub fn render(name: &str, config: &Config) -> Result<String> {
    let file: syn::File = syn::parse2(codegen(name, config)?)
        .context("generated iCE40 config did not parse")?;
    Ok(prettyplease::unparse(&file))
}

/// Reads and checks the `[ice40]` table from the task configuration.
pub fn config_from_env() -> Result<Config> {
    let text = std::env::var(TASK_CONFIG_VAR)
        .with_context(|| format!("reading ${TASK_CONFIG_VAR}"))?;
    println!("cargo:rerun-if-env-changed={TASK_CONFIG_VAR}");
    parse(&text)
}

/// Writes [`CONFIG_CONST`] for the task's iCE40 to `file` in `OUT_DIR`,
/// returning the path written.
pub fn generate(file: &str) -> Result<PathBuf> {
    let config = config_from_env()?;
    let out_dir = std::env::var("OUT_DIR").context("reading $OUT_DIR")?;
    let path = PathBuf::from(out_dir).join(file);
    std::fs::write(&path, render(CONFIG_CONST, &config)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
