use chisel_contracts::models::Operation;
use chisel_contracts::params::ParamSet;
use chisel_contracts::providers::Provider;
use serde_json::{Map, Value};

use crate::adapters::{
    HuggingFaceAdapter, ImageAdapter, OpenAiAdapter, ProviderContext, StabilityAdapter,
    StableDiffusionApiAdapter,
};
use crate::data::Data;
use crate::error::{ChiselError, Result};
use crate::results::ApiResult;

type AdapterConstructor = fn(ProviderContext, Operation) -> Result<Box<dyn ImageAdapter>>;

/// One pipeline step computed by a vendor adapter.
pub trait Stage: Send {
    fn name(&self) -> String;

    fn call(&mut self, input: Data) -> Result<Data>;
}

/// An operation bound to the provider that performs it.
pub struct Op {
    adapter: Box<dyn ImageAdapter>,
}

impl Op {
    pub fn new(operation: Operation, provider: Provider, ctx: ProviderContext) -> Result<Self> {
        let Some(construct) = constructor(operation, provider) else {
            return Err(ChiselError::InvalidProvider { provider, operation });
        };
        let adapter = construct(ctx, operation)?;
        tracing::debug!(op = %adapter.name(), "op ready");
        Ok(Self { adapter })
    }

    /// Wraps an adapter built by hand, e.g. a Stability adapter with a
    /// specific engine.
    pub fn from_adapter(adapter: Box<dyn ImageAdapter>) -> Self {
        Self { adapter }
    }

    pub fn provider(&self) -> Provider {
        self.adapter.provider()
    }

    pub fn operation(&self) -> Operation {
        self.adapter.operation()
    }

    pub fn name(&self) -> String {
        self.adapter.name()
    }

    pub fn get_params(&self) -> &ParamSet {
        self.adapter.params()
    }

    pub fn set_params(&mut self, updates: &Map<String, Value>) -> Vec<String> {
        self.adapter.set_params(updates)
    }

    pub fn call(&mut self, input: impl Into<Data>) -> Result<ApiResult> {
        self.adapter.run(input.into(), None)
    }

    pub fn call_with(&mut self, input: impl Into<Data>, params: &Map<String, Value>) -> Result<ApiResult> {
        self.adapter.run(input.into(), Some(params))
    }
}

impl Stage for Op {
    fn name(&self) -> String {
        Op::name(self)
    }

    fn call(&mut self, input: Data) -> Result<Data> {
        Op::call(self, input).map(Data::Result)
    }
}

/// Whether `provider` can perform `operation`.
pub fn supports(operation: Operation, provider: Provider) -> bool {
    constructor(operation, provider).is_some()
}

pub fn providers_for(operation: Operation) -> Vec<Provider> {
    Provider::ALL
        .into_iter()
        .filter(|provider| supports(operation, *provider))
        .collect()
}

fn constructor(operation: Operation, provider: Provider) -> Option<AdapterConstructor> {
    use Operation::{ImgEdit, ImgToImg, SuperRes, TxtToImg, Variation};
    use Provider::{Dreambooth, HuggingFace, OpenAi, StabilityAi, StableDiffusionApi};

    match (operation, provider) {
        (TxtToImg | ImgToImg | ImgEdit | Variation, OpenAi) => Some(openai),
        (TxtToImg | ImgToImg | ImgEdit | SuperRes, StabilityAi) => Some(stability),
        (TxtToImg | ImgToImg | ImgEdit | SuperRes, StableDiffusionApi) => Some(sd_api),
        (TxtToImg | ImgToImg | ImgEdit, Dreambooth) => Some(dreambooth),
        (TxtToImg, HuggingFace) => Some(hf),
        (SuperRes, OpenAi | Dreambooth | HuggingFace)
        | (ImgToImg | ImgEdit, HuggingFace)
        | (Variation, StabilityAi | StableDiffusionApi | Dreambooth | HuggingFace) => None,
    }
}

fn openai(ctx: ProviderContext, operation: Operation) -> Result<Box<dyn ImageAdapter>> {
    Ok(Box::new(OpenAiAdapter::new(ctx, operation)?))
}

fn stability(ctx: ProviderContext, operation: Operation) -> Result<Box<dyn ImageAdapter>> {
    Ok(Box::new(StabilityAdapter::new(ctx, operation)?))
}

fn sd_api(ctx: ProviderContext, operation: Operation) -> Result<Box<dyn ImageAdapter>> {
    Ok(Box::new(StableDiffusionApiAdapter::new(ctx, operation)?))
}

fn dreambooth(ctx: ProviderContext, operation: Operation) -> Result<Box<dyn ImageAdapter>> {
    Ok(Box::new(StableDiffusionApiAdapter::dreambooth(ctx, operation)?))
}

fn hf(ctx: ProviderContext, operation: Operation) -> Result<Box<dyn ImageAdapter>> {
    Ok(Box::new(HuggingFaceAdapter::new(ctx, operation)?))
}

macro_rules! op_shorthand {
    ($(#[$meta:meta])* $name:ident => $operation:expr) => {
        $(#[$meta])*
        pub struct $name;

        impl $name {
            #[allow(clippy::new_ret_no_self)]
            pub fn new(provider: Provider, ctx: ProviderContext) -> Result<Op> {
                Op::new($operation, provider, ctx)
            }
        }
    };
}

op_shorthand!(
    /// Prompt to image.
    TxtToImg => Operation::TxtToImg
);
op_shorthand!(
    /// `[prompt, image]` to image.
    ImgToImg => Operation::ImgToImg
);
op_shorthand!(
    /// `[prompt, image, mask]` to image.
    ImgEdit => Operation::ImgEdit
);
op_shorthand!(
    /// Image (or `[prompt, image]`) to a larger image.
    SuperResolution => Operation::SuperRes
);

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chisel_contracts::models::Operation;
    use chisel_contracts::providers::Provider;
    use serde_json::json;

    use super::{providers_for, supports, ImgEdit, Op, Stage, SuperResolution, TxtToImg};
    use crate::data::Data;
    use crate::error::ChiselError;
    use crate::testing::{test_context, FakeReply, FakeTransport};

    #[test]
    fn support_matrix_matches_vendor_capabilities() {
        assert_eq!(providers_for(Operation::TxtToImg).len(), Provider::ALL.len());
        assert_eq!(
            providers_for(Operation::SuperRes),
            vec![Provider::StabilityAi, Provider::StableDiffusionApi]
        );
        assert_eq!(providers_for(Operation::Variation), vec![Provider::OpenAi]);
        assert!(!supports(Operation::ImgToImg, Provider::HuggingFace));
        assert!(supports(Operation::ImgEdit, Provider::Dreambooth));
    }

    #[test]
    fn unsupported_pair_is_invalid_provider() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let ctx = test_context(temp.path(), Arc::new(FakeTransport::scripted(vec![])));
        let err = SuperResolution::new(Provider::OpenAi, ctx).err();
        assert!(matches!(
            err,
            Some(ChiselError::InvalidProvider {
                provider: Provider::OpenAi,
                operation: Operation::SuperRes,
            })
        ));
        Ok(())
    }

    #[test]
    fn every_supported_pair_constructs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        for operation in Operation::ALL {
            for provider in providers_for(operation) {
                let ctx = test_context(temp.path(), Arc::new(FakeTransport::scripted(vec![])));
                let op = Op::new(operation, provider, ctx)?;
                assert_eq!(op.operation(), operation);
                assert_eq!(op.provider(), provider);
            }
        }
        Ok(())
    }

    #[test]
    fn op_call_runs_the_adapter() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = Arc::new(FakeTransport::scripted(vec![
            FakeReply::json(200, json!({"status": "success", "output": ["https://cdn.test/a.png"]})),
            FakeReply::png(4, 4),
        ]));
        let ctx = test_context(temp.path(), transport.clone());
        let mut op = TxtToImg::new(Provider::StableDiffusionApi, ctx)?;

        let dropped = op.set_params(json!({"samples": "1", "bogus": true}).as_object().expect("object"));
        assert_eq!(dropped, vec!["bogus".to_string()]);
        assert_eq!(op.get_params().get("samples"), Some(&json!("1")));

        let output = Stage::call(&mut op, Data::from("a cat"))?;
        assert_eq!(output.as_result().map(|result| result.len()), Some(1));
        assert_eq!(Stage::name(&op), "stable_diffusion_api.txt_to_img");
        Ok(())
    }

    #[test]
    fn edit_op_validates_before_network() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = Arc::new(FakeTransport::scripted(vec![]));
        let ctx = test_context(temp.path(), transport.clone());
        let mut op = ImgEdit::new(Provider::OpenAi, ctx)?;

        assert!(matches!(op.call("only a prompt"), Err(ChiselError::InvalidArgument(_))));
        assert_eq!(transport.call_count(), 0);
        Ok(())
    }
}
