//! Turns static-archiver steps into library targets.

use anyhow::Result;
use tracing::info;

use super::target_gen::{add_inputs, add_outputs, BuildTargetGen, GenContext};
use super::trace_node::{NodeKind, TraceNode};
use crate::graph::GraphNode;
use crate::record::{BuildTarget, CLink, Rule};

pub struct StaticLinkBuildTargetGen;

impl BuildTargetGen for StaticLinkBuildTargetGen {
    fn generate(&self, ctx: &mut GenContext, node: &TraceNode) -> Result<Option<BuildTarget>> {
        if node.kind() != NodeKind::StaticLinkStep {
            return Ok(None);
        }

        let mut target = BuildTarget {
            qualified_name: String::new(),
            srcs: Vec::new(),
            outputs: Vec::new(),
            rule: Rule::CLink(CLink {
                is_library: true,
                ..CLink::default()
            }),
            install: false,
        };

        if add_inputs(ctx, node, &mut target, &["o"], 0) < 1 {
            info!(step = %node.id(), "not enough inputs");
            return Ok(None);
        }
        if add_outputs(ctx, node, &mut target, &["a"], 1) < 1 {
            info!(step = %node.id(), "not enough outputs");
            return Ok(None);
        }

        let archive_name = target.outputs[0].name.clone();
        target.qualified_name = ctx.new_target_name(&archive_name)?;
        Ok(Some(target))
    }
}
