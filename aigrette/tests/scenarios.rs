//! End-to-end scenarios across the engines.

use aigrette::aig::{Aig, Lit};
use aigrette::interpolate::{prove, ProveOutcome, ProveParams};
use aigrette::map::{map_luts, verify_cover, MapParams};
use aigrette::sim::Simulator;
use aigrette::sweep::{sweep, trivial_care, SweepParams};
use aigrette::{aiger, Error};
use proptest::prelude::*;

/// The small shared example: three inputs, two reconvergent AND pairs, and
/// an XOR of the two functionally equal cones.
fn tiny() -> (Aig, Lit) {
    let mut aig = Aig::new();
    let a = aig.add_ci();
    let b = aig.add_ci();
    let c = aig.add_ci();
    let x = aig.and(a, b);
    let y = aig.and(b, c);
    let u = aig.and(x, c);
    let w = aig.and(a, y);
    let g = aig.xor(u, w);
    aig.add_co(g);
    (aig, g)
}

#[test]
fn tiny_build_has_the_expected_shape() {
    let mut aig = Aig::new();
    let a = aig.add_ci();
    let b = aig.add_ci();
    let c = aig.add_ci();
    let x = aig.and(a, b);
    assert_eq!(aig.and(b, a), x, "hashing is commutative");
    let y = aig.and(b, c);
    let u = aig.and(x, c);
    let w = aig.and(a, y);
    let g = aig.xor(u, w);
    aig.add_co(g);
    // Four named ANDs plus the three of the XOR construction.
    assert_eq!(aig.and_count(), 7);
    aig.check().unwrap();
    assert!(aig.is_normalized());
}

#[test]
fn structural_hashing_is_idempotent() {
    let mut aig = Aig::new();
    let a = aig.add_ci();
    let b = aig.add_ci();
    let before = aig.and_count();
    let x1 = aig.and(a, b);
    assert_eq!(aig.and_count(), before + 1);
    let x2 = aig.and(a, b);
    assert_eq!(x1, x2);
    assert_eq!(aig.and_count(), before + 1);
}

#[test]
fn compact_aiger_round_trip() {
    let (aig, _) = tiny();
    let bytes = aiger::write_bytes(&aig, true, false).unwrap();
    assert!(
        bytes.starts_with(b"aig2 10 3 0 1 7\n"),
        "unexpected header: {:?}",
        String::from_utf8_lossy(&bytes[..16])
    );
    let back = aiger::read_bytes(&bytes).unwrap();
    back.check().unwrap();
    assert_eq!(back.ci_count(), aig.ci_count());
    assert_eq!(back.co_count(), aig.co_count());
    assert_eq!(back.and_count(), aig.and_count());
    // Same construction order on both sides: fanins match node for node.
    for (n1, n2) in aig.ands().zip(back.ands()) {
        assert_eq!(aig.and_fanins(n1), back.and_fanins(n2));
    }
    assert_eq!(aig.co_driver_at(0), back.co_driver_at(0));
}

#[test]
fn seeded_simulation_matches_the_function() {
    let mut aig = Aig::new();
    let a = aig.add_ci();
    let b = aig.add_ci();
    let c = aig.add_ci();
    let ab = aig.and(a, b);
    let bc = aig.and(b, c);
    let g = aig.xor(ab, bc);
    aig.add_co(g);

    let wa = 0xAAAA_AAAA_AAAA_AAAAu64;
    let wb = 0xCCCC_CCCC_CCCC_CCCCu64;
    let wc = 0xF0F0_F0F0_F0F0_F0F0u64;
    let mut sim = Simulator::new(0);
    sim.reset_patterns(&aig, 1);
    sim.set_ci_words(0, &[wa]);
    sim.set_ci_words(1, &[wb]);
    sim.set_ci_words(2, &[wc]);
    sim.run(&aig);
    assert_eq!(sim.lit_word(g, 0), (wa & wb) ^ (wb & wc));
}

#[test]
fn sweeping_merges_a_hash_bypassed_duplicate() {
    let mut aig = Aig::new();
    let a = aig.add_ci();
    let b = aig.add_ci();
    let n1 = aig.append_and_raw(a, b);
    let n2 = aig.append_and_raw(b, a);
    aig.add_co(n1);
    aig.add_co(n2);
    assert_eq!(aig.and_count(), 2);

    let care = trivial_care(2);
    let (swept, stats) = sweep(&aig, &care, &SweepParams::default()).unwrap();
    assert_eq!(swept.and_count(), 1);
    assert_eq!(swept.co_driver_at(0), swept.co_driver_at(1));
    assert!(stats.merged >= 1);
    swept.check().unwrap();
}

#[test]
fn sweeping_the_tiny_example_collapses_the_xor() {
    // u and w compute the same function, so the XOR collapses to constant
    // false once they merge.
    let (aig, _) = tiny();
    let care = trivial_care(3);
    let (swept, _) = sweep(&aig, &care, &SweepParams::default()).unwrap();
    assert_eq!(swept.co_driver_at(0), Lit::CONST0);
}

#[test]
fn interpolation_finds_the_depth_one_counterexample() {
    // One register starting at 0, next state r | !input, bad output r.
    // Depth 0 is unsatisfiable; depth 1 has the witness input = 0.
    let mut aig = Aig::new();
    let input = aig.add_ci();
    let r = aig.add_ci();
    let next = aig.or(r, !input);
    aig.add_co(r);
    aig.add_co(next);
    aig.set_register_count(1);

    match prove(&aig, &ProveParams::default()).unwrap() {
        ProveOutcome::Cex { frame, inputs } => {
            assert_eq!(frame, 1);
            assert_eq!(inputs.len(), 2);
            assert!(!inputs[0][0], "the witness holds the input at 0");
        }
        other => panic!("expected a counterexample, got {:?}", other),
    }
}

#[test]
fn interpolation_proves_an_unreachable_bad_state() {
    // r' = r & input with r0 = 0 never leaves 0.
    let mut aig = Aig::new();
    let input = aig.add_ci();
    let r = aig.add_ci();
    let next = aig.and(r, input);
    aig.add_co(r);
    aig.add_co(next);
    aig.set_register_count(1);
    assert_eq!(
        prove(&aig, &ProveParams::default()).unwrap(),
        ProveOutcome::Proved
    );
}

#[test]
fn mapping_survives_the_codec() {
    let (mut aig, _) = tiny();
    let (mapping, stats) = map_luts(&aig, &MapParams::default());
    assert!(verify_cover(&aig, &mapping));
    assert!(stats.area >= 1);
    aig.mapping = Some(mapping);
    let bytes = aiger::write_bytes(&aig, false, true).unwrap();
    let back = aiger::read_bytes(&bytes).unwrap();
    let got = back.mapping.clone().expect("mapping section read back");
    assert!(verify_cover(&back, &got));
}

#[test]
fn pipeline_read_sweep_map_write() {
    // Codec -> sweeper -> mapper -> codec, end to end.
    let (aig, _) = tiny();
    let bytes = aiger::write_bytes(&aig, true, false).unwrap();
    let loaded = aiger::read_bytes(&bytes).unwrap();
    let care = trivial_care(3);
    let (swept, _) = sweep(&loaded, &care, &SweepParams::default()).unwrap();
    let mut compact = swept.clone_compacted();
    let (mapping, _) = map_luts(&compact, &MapParams::default());
    assert!(verify_cover(&compact, &mapping));
    compact.mapping = Some(mapping);
    let out = aiger::write_bytes(&compact, true, true).unwrap();
    let reloaded = aiger::read_bytes(&out).unwrap();
    reloaded.check().unwrap();
    assert_eq!(reloaded.and_count(), compact.and_count());
}

#[test]
fn truncated_extensions_are_rejected_conservatively() {
    let (mut aig, _) = tiny();
    aig.switching = Some(vec![1; aig.node_count()]);
    let bytes = aiger::write_bytes(&aig, false, true).unwrap();
    let tag = bytes.windows(1).position(|w| w[0] == b's').unwrap();
    assert!(matches!(
        aiger::read_bytes(&bytes[..tag + 5]),
        Err(Error::MalformedInput { .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Randomly grown managers survive both codec modes unchanged.
    #[test]
    fn aiger_round_trip_law(
        n_in in 1usize..6,
        ops in prop::collection::vec((any::<u8>(), any::<u8>(), any::<bool>(), any::<bool>()), 1..50),
    ) {
        let mut aig = Aig::new();
        let mut pool: Vec<Lit> = (0..n_in).map(|_| aig.add_ci()).collect();
        for (i, j, c0, c1) in ops {
            let f0 = pool[i as usize % pool.len()].xor_complement(c0);
            let f1 = pool[j as usize % pool.len()].xor_complement(c1);
            let g = aig.and(f0, f1);
            pool.push(g);
        }
        aig.add_co(*pool.last().unwrap());
        aig.add_co(pool[pool.len() / 2]);
        aig.check().unwrap();

        for compact in [false, true] {
            let bytes = aiger::write_bytes(&aig, compact, false).unwrap();
            let back = aiger::read_bytes(&bytes).unwrap();
            back.check().unwrap();
            prop_assert_eq!(back.ci_count(), aig.ci_count());
            prop_assert_eq!(back.and_count(), aig.and_count());
            prop_assert_eq!(back.co_count(), aig.co_count());
            for i in 0..aig.co_count() {
                prop_assert_eq!(back.co_driver_at(i), aig.co_driver_at(i));
            }
        }
    }
}
