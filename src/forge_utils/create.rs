use std::path::{Path, PathBuf};

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::common::ContractSpec;
use crate::cli::PrivateKey;

#[derive(Debug)]
pub struct ForgeCreate {
    cwd: Option<PathBuf>,
    contract_spec: ContractSpec,
    private_key: Option<PrivateKey>,
    rpc_url: Option<String>,
    override_nonce: Option<u64>,
    constructor_args: Vec<String>,
    verification_args: ForgeCreateVerificationArgs,
}

#[derive(Debug, Default)]
pub struct ForgeCreateVerificationArgs {
    pub verification_api_key: Option<String>,
    pub verifier: Option<String>,
    pub verifier_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgeOutput {
    pub deployer: Address,
    pub deployed_to: Address,
    pub transaction_hash: H256,
}

impl ForgeCreate {
    pub fn new(contract_spec: ContractSpec) -> Self {
        Self {
            cwd: None,
            contract_spec,
            override_nonce: None,
            private_key: None,
            rpc_url: None,
            constructor_args: vec![],
            verification_args: ForgeCreateVerificationArgs::default(),
        }
    }

    pub fn with_verification_api_key(
        mut self,
        verification_api_key: impl ToString,
    ) -> Self {
        self.verification_args.verification_api_key =
            Some(verification_api_key.to_string());
        self
    }

    pub fn with_verifier(mut self, verifier: impl ToString) -> Self {
        self.verification_args.verifier = Some(verifier.to_string());
        self
    }

    pub fn with_verifier_url(mut self, verifier_url: impl ToString) -> Self {
        self.verification_args.verifier_url = Some(verifier_url.to_string());
        self
    }

    pub fn with_cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_owned());
        self
    }

    pub fn with_override_nonce(mut self, override_nonce: u64) -> Self {
        self.override_nonce = Some(override_nonce);
        self
    }

    pub fn with_private_key(mut self, private_key: PrivateKey) -> Self {
        self.private_key = Some(private_key);
        self
    }

    pub fn with_rpc_url(mut self, rpc_url: String) -> Self {
        self.rpc_url = Some(rpc_url);
        self
    }

    pub fn with_constructor_arg(mut self, arg: impl ToString) -> Self {
        self.constructor_args.push(arg.to_string());
        self
    }

    pub fn with_constructor_args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.constructor_args
            .extend(args.into_iter().map(|arg| arg.to_string()));
        self
    }

    fn should_verify(&self) -> bool {
        let args = &self.verification_args;

        args.verification_api_key.is_some()
            || args.verifier.is_some()
            || args.verifier_url.is_some()
    }

    /// Arguments passed to `forge`. Secrets are only included when
    /// `with_secrets` is set, so the public form can be logged.
    fn command_args(&self, with_secrets: bool) -> Vec<String> {
        let mut args = vec!["create".to_string(), self.contract_spec.to_string()];

        if let Some(rpc_url) = &self.rpc_url {
            args.push("--rpc-url".to_string());
            args.push(rpc_url.clone());
        }

        if let Some(nonce) = self.override_nonce {
            args.push("--nonce".to_string());
            args.push(nonce.to_string());
        }

        if self.should_verify() {
            let verification = &self.verification_args;

            if let Some(verifier) = &verification.verifier {
                args.push("--verifier".to_string());
                args.push(verifier.clone());
            }

            if let Some(verifier_url) = &verification.verifier_url {
                args.push("--verifier-url".to_string());
                args.push(verifier_url.clone());
            }

            args.push("--verify".to_string());
        }

        args.push("--broadcast".to_string());
        args.push("--json".to_string());

        if with_secrets {
            if let Some(private_key) = &self.private_key {
                args.push("--private-key".to_string());
                args.push(format!("{private_key:#}"));
            }

            if let Some(api_key) = &self.verification_args.verification_api_key
            {
                if self.should_verify() {
                    args.push("--etherscan-api-key".to_string());
                    args.push(api_key.clone());
                }
            }
        }

        // Must stay last, forge reads every following value as an argument
        if !self.constructor_args.is_empty() {
            args.push("--constructor-args".to_string());
            args.extend(self.constructor_args.iter().cloned());
        }

        args
    }

    #[instrument(name = "forge_create", skip_all, fields(contract = %self.contract_spec))]
    pub async fn run(&self) -> eyre::Result<ForgeOutput> {
        let mut cmd = tokio::process::Command::new("forge");

        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        info!("Running forge {}", self.command_args(false).join(" "));

        cmd.args(self.command_args(true));

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            eyre::bail!("forge create failed: {}", stderr);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let s = strip_non_json(&stdout);

        let output: ForgeOutput = serde_json::from_str(s)?;

        info!("Created: {output:?}");

        Ok(output)
    }
}

fn strip_non_json(s: &str) -> &str {
    let start = s.find('{').unwrap_or(0);

    match s.rfind('}') {
        Some(last_closing_brace) if last_closing_brace >= start => {
            &s[start..=last_closing_brace]
        }
        _ => &s[start..],
    }
}
