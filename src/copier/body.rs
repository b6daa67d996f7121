//! Method body rewriting.

use crate::{
    assembly::{Instruction, OpCode, Operand},
    copier::{session::CopySession, BodyEdit},
    metadata::members::{LocalVariable, MethodBody},
    metadata::token::Token,
    rewrite::{AccessibilityOracle, InstructionSynthesizer, MethodScratch, Synthesis},
    Error, Result,
};

impl CopySession<'_> {
    /// Rewrites the scanned body of `original` for its copy `copy`.
    ///
    /// Operands of the copied graph are redirected to their copies. Other operands stay as
    /// they are when the copy may reference them and are otherwise replaced by a synthesized
    /// sequence. Registered overrides run last, and a `ret` is appended to bodies that could
    /// fall off their end.
    pub(super) fn rewrite_body(&mut self, original: Token, copy: Token) -> Result<MethodBody> {
        let body = self
            .cache
            .get_mut(&original)
            .and_then(|entry| entry.body.take())
            .ok_or_else(|| malformed_error!("{} has no scanned body", original))?;

        let host = self.host;
        let probe = self.probe;
        // Every member of the graph is defined before the first body is rewritten
        let produced = self.produced.clone();
        let oracle = AccessibilityOracle::new(host, |ty| produced.contains(&ty))
            .with_generated(|member| produced.contains(&member));
        let synthesizer = InstructionSynthesizer::new(host, &oracle, probe);
        let scratch = MethodScratch::for_body(&body);

        let mut instructions = Vec::with_capacity(body.instructions.len());
        for instruction in &body.instructions {
            match &instruction.operand {
                Operand::Token(token) => {
                    let mapped = self.lookup(*token)?;
                    let candidate = instruction.with_member(mapped);
                    if self.produced.contains(&mapped) {
                        instructions.push(candidate);
                        continue;
                    }
                    let sequence = match synthesizer.synthesize(copy, &candidate, &scratch)? {
                        Synthesis::Rewritten(sequence) => sequence,
                        Synthesis::Unsupported => {
                            return Err(Error::UnsupportedOperand {
                                opcode: instruction.opcode,
                                member: host.display_name(mapped),
                            })
                        }
                    };
                    if sequence.len() != 1 || sequence[0] != candidate {
                        self.report.synthesized += 1;
                    }
                    for emitted in &sequence {
                        let Some(target) = emitted.member() else {
                            continue;
                        };
                        if !oracle.is_accessible(copy, target) {
                            self.report_illegal_access(copy, target, "method body")?;
                        }
                    }
                    instructions.extend(sequence);
                }
                Operand::Signature(signature) => {
                    let signature = self.map_signature(copy, signature)?;
                    instructions.push(Instruction {
                        opcode: instruction.opcode,
                        operand: Operand::Signature(signature),
                    });
                }
                _ => instructions.push(instruction.clone()),
            }
        }

        let mut locals = Vec::with_capacity(body.locals.len() + scratch.pool().declared_count());
        for local in &body.locals {
            let ty = self.lookup(local.ty)?;
            self.check_access(copy, ty, "local variable")?;
            locals.push(LocalVariable {
                ty,
                pinned: local.pinned,
            });
        }
        let scratch_locals = scratch.pool().declared();
        let init_locals = body.init_locals || !scratch_locals.is_empty();
        locals.extend(scratch_locals);

        let mut rewritten = MethodBody {
            locals,
            instructions,
            init_locals,
        };
        if let Some(overrides) = self.overrides.get(&original) {
            let mut edit = BodyEdit::new(original, copy, &mut rewritten);
            for apply in overrides {
                apply(&mut edit)?;
            }
        }
        if !rewritten
            .instructions
            .last()
            .is_some_and(Instruction::is_terminal)
        {
            rewritten.instructions.push(Instruction::simple(OpCode::Ret));
        }
        Ok(rewritten)
    }
}
