use serde::{Deserialize, Serialize};

/// Knobs for one deobfuscation call.
///
/// `unpack`, `jsvmp` and `advanced` force a stage on or off; left unset, the stage runs only when
/// `auto` is on and the classifier reported one of its trigger techniques. `aggressive` counts as
/// an explicit "on" for the VM and advanced stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeobfuscateOptions {
    pub auto: bool,
    pub aggressive: bool,
    pub ast_optimize: bool,
    pub rename_variables: bool,
    pub llm: bool,
    pub unpack: Option<bool>,
    pub jsvmp: Option<bool>,
    pub advanced: Option<bool>,
}

impl Default for DeobfuscateOptions {
    fn default() -> Self {
        Self {
            auto: true,
            aggressive: false,
            ast_optimize: true,
            rename_variables: false,
            llm: false,
            unpack: None,
            jsvmp: None,
            advanced: None,
        }
    }
}

impl DeobfuscateOptions {
    pub fn aggressive() -> Self {
        Self {
            aggressive: true,
            rename_variables: true,
            ..Default::default()
        }
    }

    /// Explicit override for a VM-oriented stage, folding in `aggressive`.
    pub fn vm_stage_override(&self, explicit: Option<bool>) -> Option<bool> {
        explicit.or(if self.aggressive { Some(true) } else { None })
    }

    /// Stable text form of every option that changes the output.
    pub fn cache_fingerprint(&self) -> String {
        fn tri(v: Option<bool>) -> &'static str {
            match v {
                Some(true) => "1",
                Some(false) => "0",
                None => "-",
            }
        }
        format!(
            "auto={};aggressive={};optimize={};rename={};llm={};unpack={};jsvmp={};advanced={}",
            self.auto as u8,
            self.aggressive as u8,
            self.ast_optimize as u8,
            self.rename_variables as u8,
            self.llm as u8,
            tri(self.unpack),
            tri(self.jsvmp),
            tri(self.advanced),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoOptions {
    #[serde(rename = "useAI")]
    pub use_ai: bool,
}

impl CryptoOptions {
    pub fn cache_fingerprint(&self) -> String {
        format!("ai={}", self.use_ai as u8)
    }
}
