//! Compiled contract artifacts.
//!
//! An [`ArtifactStore`] is the "factory" lookup of the gateway: given a
//! contract name it finds the compiler output, parses its ABI and bytecode and
//! encodes constructor and method calls from textual arguments.

use std::path::PathBuf;

use alloy_core::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt, Specifier},
    json_abi::{Function, JsonAbi, Param},
};
use anyhow::{Context, Result};
use serde::Deserialize;

/// ABI and creation bytecode of one contract.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    pub abi: JsonAbi,
    pub bytecode: Vec<u8>,
}

/// On-disk layout of a compiler artifact.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    #[serde(default)]
    contract_name: Option<String>,
    abi: JsonAbi,
    bytecode: ArtifactBytecode,
}

/// Hardhat stores a plain hex string, Foundry an object with an `object` key.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ArtifactBytecode {
    Hex(String),
    Object { object: String },
}

impl ArtifactBytecode {
    fn as_hex(&self) -> &str {
        match self {
            ArtifactBytecode::Hex(hex) => hex,
            ArtifactBytecode::Object { object } => object,
        }
    }
}

impl ContractArtifact {
    /// Parse an artifact from its JSON text.
    pub fn from_json(name: &str, content: &str) -> Result<Self> {
        let file: ArtifactFile = serde_json::from_str(content)
            .with_context(|| format!("Failed to parse artifact for {}", name))?;

        let hex_code = file.bytecode.as_hex().trim_start_matches("0x");
        if hex_code.is_empty() {
            anyhow::bail!(
                "Artifact for {} has no bytecode (abstract contract or interface?)",
                name
            );
        }
        let bytecode = hex::decode(hex_code)
            .with_context(|| format!("Artifact for {} has malformed bytecode", name))?;

        Ok(Self {
            name: file.contract_name.unwrap_or_else(|| name.to_string()),
            abi: file.abi,
            bytecode,
        })
    }

    /// Creation bytecode followed by the ABI-encoded constructor arguments.
    pub fn deploy_data(&self, args: &[String]) -> Result<Vec<u8>> {
        let mut data = self.bytecode.clone();
        match &self.abi.constructor {
            Some(constructor) => {
                let values = coerce_args(&constructor.inputs, args)
                    .with_context(|| format!("Invalid constructor arguments for {}", self.name))?;
                data.extend(constructor.abi_encode_input(&values)?);
            }
            None if args.is_empty() => {}
            None => anyhow::bail!(
                "{} has no constructor but {} argument(s) were given",
                self.name,
                args.len()
            ),
        }
        Ok(data)
    }

    /// The overload of `method` taking exactly `arity` arguments.
    pub fn function(&self, method: &str, arity: usize) -> Result<&Function> {
        let overloads = self
            .abi
            .function(method)
            .with_context(|| format!("{} has no method `{}`", self.name, method))?;
        overloads
            .iter()
            .find(|f| f.inputs.len() == arity)
            .with_context(|| {
                format!(
                    "{} has no overload of `{}` taking {} argument(s)",
                    self.name, method, arity
                )
            })
    }

    /// Selector plus ABI-encoded arguments of a method call.
    pub fn call_data(&self, method: &str, args: &[String]) -> Result<Vec<u8>> {
        let function = self.function(method, args.len())?;
        let values = coerce_args(&function.inputs, args)
            .with_context(|| format!("Invalid arguments for {}.{}", self.name, method))?;
        Ok(function.abi_encode_input(&values)?)
    }

    /// Decode the return data of `method` into printable strings.
    pub fn decode_output(&self, method: &str, arity: usize, data: &[u8]) -> Result<Vec<String>> {
        let function = self.function(method, arity)?;
        let values = function
            .abi_decode_output(data)
            .with_context(|| format!("Failed to decode output of {}.{}", self.name, method))?;
        Ok(values.iter().map(render_value).collect())
    }
}

/// Coerce textual arguments into typed ABI values.
fn coerce_args(params: &[Param], args: &[String]) -> Result<Vec<DynSolValue>> {
    if params.len() != args.len() {
        anyhow::bail!("expected {} argument(s), got {}", params.len(), args.len());
    }
    params
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty = param
                .resolve()
                .with_context(|| format!("Unsupported parameter type {}", param.ty))?;
            ty.coerce_str(arg)
                .with_context(|| format!("`{}` is not a valid {}", arg, param.ty))
        })
        .collect()
}

fn render_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Address(a) => a.to_string(),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Uint(v, _) => v.to_string(),
        DynSolValue::Int(v, _) => v.to_string(),
        other => format!("{:?}", other),
    }
}

/// Locates artifacts below a root directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Load the artifact of `contract`.
    ///
    /// Searches `<root>/**/<contract>.json`, which covers both the
    /// `contracts/<File>.sol/<Contract>.json` and the flat layouts.
    pub fn load(&self, contract: &str) -> Result<ContractArtifact> {
        let path = self.find(contract)?;
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        tracing::trace!(contract, path = %path.display(), "Artifact loaded");
        ContractArtifact::from_json(contract, &content)
    }

    fn find(&self, contract: &str) -> Result<PathBuf> {
        let file_name = format!("{}.json", contract);
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let entries = std::fs::read_dir(&dir)
                .with_context(|| format!("Failed to read artifacts directory {}", dir.display()))?;
            for entry in entries {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n == file_name)
                {
                    return Ok(path);
                }
            }
        }

        anyhow::bail!(
            "No artifact for {} under {}",
            contract,
            self.root.display()
        )
    }
}
