/// Shadow execution of hand-built traces through the whole pipeline.
mod common;

#[cfg(test)]
mod synthesis_tests {
  use crate::common::{CONTRACT, Fixture, build};
  use revm::bytecode::opcode;
  use revm::primitives::U256;
  use std::collections::BTreeMap;
  use zsynth_core::SynthError;
  use zsynth_core::buffer::BufferKind;
  use zsynth_core::circuit::{WIRE_BITS, join_halves};
  use zsynth_core::config::{FrontendConfig, Subcircuit};
  use zsynth_core::storage::StorageBackend;
  use zsynth_core::synthesizer::Synthesizer;
  use zsynth_core::trace::StorageWrite;
  use zsynth_core::transaction::{BlockInfo, CALLDATA_LEN};

  fn u(v: u64) -> U256 {
    U256::from(v)
  }

  #[test]
  fn test_add_boundary_placement() {
    let fx = Fixture::new(&[]);
    let output = fx.synthesize(fx.add_trace(12), &[]).unwrap();
    assert_eq!(output.steps, 4);

    let adds: Vec<_> = output.placements.iter().filter(|p| p.usage == "ADD").collect();
    assert_eq!(adds.len(), 1);
    let add = adds[0];
    assert_eq!(add.name, Subcircuit::Alu1);
    // selector first, then the popped operands top first
    let operands: Vec<U256> = add.inputs[1..].iter().map(|p| p.value).collect();
    assert_eq!(operands, vec![u(5), u(7)]);
    assert_eq!(add.outputs.len(), 1);
    assert_eq!(add.outputs[0].value, u(12));
    for input in &add.inputs {
      assert_eq!(input.source, BufferKind::EvmIn.index(), "ADD reads static loads only");
    }
    assert_eq!(output.resulting_root, fx.storage.initial_root());
  }

  #[test]
  fn test_wrong_interpreter_result_diverges() {
    let fx = Fixture::new(&[]);
    let err = fx.synthesize(fx.add_trace(13), &[]).unwrap_err();
    assert!(matches!(err, SynthError::Step { opcode: opcode::ADD, pc: 4, .. }), "{err}");
    assert!(matches!(err.root_cause(), SynthError::Divergence(_)));
  }

  #[test]
  fn test_cold_read_then_warm_read() {
    let fx = Fixture::new(&[(1, 100), (2, 200)]);
    let mut synthesizer = fx.synthesizer();
    let events = vec![
      fx.open(),
      fx.step(0, opcode::PUSH1, &[]),
      fx.step(2, opcode::SLOAD, &[1]),
      fx.step(3, opcode::PUSH1, &[100]),
      fx.step(5, opcode::SLOAD, &[1, 100]),
      fx.step(6, opcode::STOP, &[100, 100]),
      fx.close(&[100, 100]),
    ];
    let mut counts = Vec::new();
    for event in events {
      synthesizer.handle_event(event).unwrap();
      counts.push(synthesizer.state().placements().len());
    }
    // the cold read is handled when pc 3 arrives, the warm one when pc 6 does
    assert!(counts[3] > counts[2], "a cold read authenticates the slot");
    assert_eq!(counts[5], counts[4], "a warm read places nothing");
    let verifications = synthesizer
      .state()
      .placements()
      .iter()
      .filter(|p| p.name == Subcircuit::VerifyMerkleProof2x)
      .count();
    assert_eq!(verifications, 1);

    let output = synthesizer.finish(&[]).unwrap();
    let verifications = output
      .placements
      .iter()
      .filter(|p| p.name == Subcircuit::VerifyMerkleProof2x)
      .count();
    assert_eq!(verifications, 16, "every leaf of the depth-2 tree is verified once");
    assert_eq!(output.resulting_root, fx.storage.initial_root());
  }

  fn store_trace(fx: &Fixture) -> Vec<zsynth_core::trace::TraceEvent> {
    vec![
      fx.open(),
      fx.step(0, opcode::PUSH1, &[]),
      fx.step(2, opcode::SLOAD, &[1]),
      fx.step(3, opcode::POP, &[100]),
      fx.step(4, opcode::PUSH1, &[]),
      fx.step(6, opcode::PUSH1, &[55]),
      fx.step(8, opcode::SSTORE, &[1, 55]),
      fx.step(9, opcode::STOP, &[]),
      fx.close(&[]),
    ]
  }

  #[test]
  fn test_committed_write_updates_root() {
    let fx = Fixture::new(&[(1, 100), (2, 200)]);
    let write = StorageWrite {
      address: CONTRACT,
      key: u(1),
      value: u(55),
    };
    let output = fx.synthesize(store_trace(&fx), &[write]).unwrap();
    let expected = fx.storage.updated_root(&BTreeMap::from([(u(1), u(55))])).unwrap();
    assert_eq!(output.resulting_root, expected);
    assert_ne!(output.resulting_root, fx.storage.initial_root());
  }

  #[test]
  fn test_uncommitted_write_diverges() {
    let fx = Fixture::new(&[(1, 100), (2, 200)]);
    let err = fx.synthesize(store_trace(&fx), &[]).unwrap_err();
    assert!(matches!(err.root_cause(), SynthError::Divergence(_)), "{err}");
  }

  #[test]
  fn test_unsupported_opcode_is_precondition() {
    let fx = Fixture::new(&[]);
    let events = vec![
      fx.open(),
      fx.step(0, opcode::SELFDESTRUCT, &[]),
      fx.step(1, opcode::STOP, &[]),
      fx.close(&[]),
    ];
    let err = fx.synthesize(events, &[]).unwrap_err();
    assert!(matches!(err.root_cause(), SynthError::Precondition(_)), "{err}");
  }

  #[test]
  fn test_truncated_trace_is_referential() {
    let fx = Fixture::new(&[]);
    let mut events = fx.add_trace(12);
    events.pop();
    let err = fx.synthesize(events, &[]).unwrap_err();
    assert!(matches!(err, SynthError::Referential(_)), "{err}");
  }

  #[test]
  fn test_split_wires_join_back() {
    let fx = Fixture::new(&[]);
    let output = fx.synthesize(fx.add_trace(12), &[]).unwrap();
    let circuit = build(&output).unwrap();
    let normalized = &circuit.normalized;
    for placement in &normalized.placements {
      for point in placement.inputs.iter().chain(&placement.outputs) {
        assert!(point.bit_size <= WIRE_BITS, "{} keeps a {}-bit wire", placement.usage, point.bit_size);
      }
    }
    let add_index = output.placements.iter().position(|p| p.usage == "ADD").unwrap();
    let add = &normalized.placements[add_index];
    assert_eq!(add.outputs.len(), 2);
    assert_eq!(join_halves(add.outputs[0].value, add.outputs[1].value).unwrap(), u(12));
  }

  #[test]
  fn test_synthesis_is_deterministic() {
    let fx = Fixture::new(&[(1, 100), (2, 200)]);
    let first = fx.synthesize(store_trace(&fx), &[StorageWrite { address: CONTRACT, key: u(1), value: u(55) }]);
    let second = fx.synthesize(store_trace(&fx), &[StorageWrite { address: CONTRACT, key: u(1), value: u(55) }]);
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.placements, second.placements);
    assert_eq!(first.resulting_root, second.resulting_root);

    let (a, b) = (build(&first).unwrap(), build(&second).unwrap());
    assert_eq!(a.normalized.variables, b.normalized.variables);
    assert_eq!(a.permutation.entries, b.permutation.entries);
  }

  #[test]
  fn test_forged_signature_is_precondition() {
    let mut fx = Fixture::new(&[]);
    fx.tx.signature.s += u(1);
    let err = Synthesizer::new(FrontendConfig::default(), &fx.storage, &fx.tx, &fx.block).err().unwrap();
    assert!(matches!(err, SynthError::Precondition(_)), "{err}");
  }

  #[test]
  fn test_calldataload_zero_pads_past_the_end() {
    let mut inputs = vec![U256::ZERO; 9];
    inputs[8] = u(0xabcd);
    let fx = Fixture::with_inputs(&[], &inputs);
    let tail = (CALLDATA_LEN - 2) as u64;
    let padded = u(0xabcd) << 240;
    let events = vec![
      fx.open(),
      fx.step(0, opcode::PUSH2, &[]),
      fx.step(3, opcode::CALLDATALOAD, &[tail]),
      fx.step_words(4, opcode::PUSH2, vec![padded]),
      fx.step_words(7, opcode::CALLDATALOAD, vec![u(400), padded]),
      fx.step_words(8, opcode::STOP, vec![U256::ZERO, padded]),
      fx.close_words(vec![U256::ZERO, padded]),
    ];
    fx.synthesize(events, &[]).unwrap();

    let wrong = vec![
      fx.open(),
      fx.step(0, opcode::PUSH2, &[]),
      fx.step(3, opcode::CALLDATALOAD, &[tail]),
      fx.step(4, opcode::STOP, &[0xabcd]),
      fx.close(&[0xabcd]),
    ];
    let err = fx.synthesize(wrong, &[]).unwrap_err();
    assert!(matches!(err.root_cause(), SynthError::Divergence(_)), "{err}");
  }

  #[test]
  fn test_block_hash_outside_window_is_loaded_from_interpreter() {
    let mut fx = Fixture::new(&[]);
    fx.block = BlockInfo {
      number: u(1000),
      block_hashes: vec![u(0x1111), u(0x2222)],
      ..BlockInfo::default()
    };
    let frontend = FrontendConfig {
      n_prev_block_hashes: 2,
      ..FrontendConfig::default()
    };
    let events = vec![
      fx.open(),
      fx.step(0, opcode::PUSH2, &[]),
      fx.step(3, opcode::BLOCKHASH, &[999]),
      fx.step(4, opcode::PUSH2, &[0x1111]),
      fx.step(7, opcode::BLOCKHASH, &[996, 0x1111]),
      fx.step(8, opcode::STOP, &[0x4444, 0x1111]),
      fx.close(&[0x4444, 0x1111]),
    ];
    let output = Synthesizer::new(frontend, &fx.storage, &fx.tx, &fx.block)
      .unwrap()
      .run(&mut events.into_iter(), &[])
      .unwrap();
    let evm_in = &output.placements[BufferKind::EvmIn.index()];
    let loaded = evm_in
      .outputs
      .iter()
      .find(|point| point.ext_source.as_deref() == Some("BLOCKHASH 4 blocks ago"))
      .unwrap();
    assert_eq!(loaded.value, u(0x4444));
  }

  #[test]
  fn test_stack_height_follows_opcode_arity() {
    let fx = Fixture::new(&[]);
    let events = vec![
      fx.open(),
      fx.step(0, opcode::PUSH1, &[]),
      fx.step(2, opcode::DUP1, &[7]),
      fx.step(3, opcode::STOP, &[7]),
      fx.close(&[7]),
    ];
    let err = fx.synthesize(events, &[]).unwrap_err();
    assert!(matches!(err, SynthError::Step { opcode: opcode::DUP1, pc: 2, .. }), "{err}");
    assert!(err.root_cause().to_string().contains("expected 2"), "{err}");
  }
}
