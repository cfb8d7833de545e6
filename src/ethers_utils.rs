use std::sync::Arc;

use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::{Abi, ParamType, Tokenizable};
use ethers::middleware::SignerMiddleware;
use ethers::prelude::encode_function_data;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, Bytes, Eip1559TransactionRequest, TransactionReceipt,
};
use eyre::{bail, ContextCompat, WrapErr};

pub type RpcSigner = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct Transaction<T> {
    abi: Abi,
    function_name: String,
    args: T,
    signer: Arc<RpcSigner>,
    to: Address,
    nonce: Option<u64>,
}

#[derive(Default, Clone, Debug)]
pub struct TransactionBuilder<T> {
    abi: Option<Abi>,
    function_name: Option<String>,
    args: Option<T>,
    signer: Option<Arc<RpcSigner>>,
    to: Option<Address>,
    nonce: Option<u64>,
}

impl<T> TransactionBuilder<T> {
    pub fn abi(mut self, abi: Abi) -> Self {
        self.abi = Some(abi);
        self
    }

    pub fn function_name(mut self, function_name: impl ToString) -> Self {
        self.function_name = Some(function_name.to_string());
        self
    }

    pub fn args(mut self, args: T) -> Self {
        self.args = Some(args);
        self
    }

    pub fn signer(mut self, signer: Arc<RpcSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn build(self) -> eyre::Result<Transaction<T>> {
        Ok(Transaction {
            abi: self.abi.context("TransactionBuilder missing abi")?,
            function_name: self
                .function_name
                .context("TransactionBuilder missing function_name")?,
            args: self.args.context("TransactionBuilder missing args")?,
            signer: self.signer.context("TransactionBuilder missing signer")?,
            to: self.to.context("TransactionBuilder missing to")?,
            nonce: self.nonce,
        })
    }
}

impl<T> Transaction<T>
where
    T: Tokenizable,
{
    /// Sends the call and waits until it is mined. A reverted transaction is
    /// an error.
    pub async fn send(self) -> eyre::Result<TransactionReceipt> {
        let func = self.abi.function(&self.function_name)?;
        let call_data = encode_function_data(func, self.args)?;

        let mut request =
            Eip1559TransactionRequest::new().to(self.to).data(call_data);

        if let Some(nonce) = self.nonce {
            request = request.nonce(nonce);
        }

        let mut tx = TypedTransaction::Eip1559(request);

        self.signer.fill_transaction(&mut tx, None).await?;

        let tx = self
            .signer
            .send_transaction(tx, None)
            .await
            .wrap_err("Send transaction")?;

        let receipt = tx
            .await
            .wrap_err("Awaiting receipt")?
            .context("Transaction dropped before being mined")?;

        if receipt.status != Some(1.into()) {
            bail!(
                "{} reverted in transaction {:?}",
                self.function_name,
                receipt.transaction_hash
            );
        }

        Ok(receipt)
    }
}

/// ABI-encodes a call to `function_name`, parsing each argument according to
/// the matching parameter type.
pub fn encode_call(
    abi: &Abi,
    function_name: &str,
    args: &[String],
) -> eyre::Result<Bytes> {
    let function = abi
        .function(function_name)
        .wrap_err_with(|| format!("ABI has no function `{function_name}`"))?;

    if function.inputs.len() != args.len() {
        bail!(
            "`{}` takes {} arguments, got {}",
            function.signature(),
            function.inputs.len(),
            args.len()
        );
    }

    let tokens = function
        .inputs
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let value = match param.kind {
                ParamType::Address
                | ParamType::Bytes
                | ParamType::FixedBytes(_) => {
                    arg.strip_prefix("0x").unwrap_or(arg)
                }
                _ => arg.as_str(),
            };

            LenientTokenizer::tokenize(&param.kind, value).wrap_err_with(|| {
                format!("Encoding {arg:?} as {} for `{}`", param.kind, param.name)
            })
        })
        .collect::<eyre::Result<Vec<_>>>()?;

    let data = function.encode_input(&tokens)?;

    Ok(data.into())
}
