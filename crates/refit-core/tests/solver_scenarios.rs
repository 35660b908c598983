use refit_core::common::FrequencyWindow;
use refit_core::numerics::{FaerGemm, Gemm, ReferenceGemm};
use refit_core::refit::{
    ChannelTemplate, LinearOperator, NoiseBlockStore, RefitOperator, RefitSystem,
    ResolvedWireModel, SolverSettings, initial_guess, project_amplitudes, solve_block_bicgstab,
};

/// One u-wire channel and one APD gang at a single real-only bin with white
/// noise and no wire signals. Only the light column is solved.
fn white_noise_problem() -> (NoiseBlockStore, RefitSystem) {
    let window = FrequencyWindow { min: 5, max: 5 };
    let store = NoiseBlockStore::from_blocks(vec![10, 152], window, vec![vec![1.0, 0.0, 0.0, 1.0]])
        .expect("noise store");
    let system =
        RefitSystem::new(&store, vec![1.0], Vec::new(), vec![1.0], vec![0.0]).expect("system");
    (store, system)
}

#[test]
fn white_noise_solve_recovers_unit_light_filter() {
    let (store, system) = white_noise_problem();
    let layout = system.layout();
    assert_eq!(layout.column_len(), 3);

    let mut solution = initial_guess(&system, &store);
    assert_eq!(solution, vec![0.0, 1.0, 0.0]);

    let kernels: [&dyn Gemm; 2] = [&ReferenceGemm, &FaerGemm];
    for gemm in kernels {
        let mut solution = solution.clone();
        let operator = RefitOperator::new(&store, &system, gemm).expect("operator");
        let report =
            solve_block_bicgstab(&operator, &mut solution, SolverSettings::default(), gemm);
        assert!(report.converged, "{}: {report:?}", gemm.name());
        assert!(report.iterations <= 2, "{}: {report:?}", gemm.name());

        assert!(solution[0].abs() < 1.0e-9);
        assert!((solution[1] - 1.0).abs() < 1.0e-9);
        assert!((solution[2] + 1.0).abs() < 1.0e-9);

        // A waveform equal to the light template on the gang.
        let spectra = vec![vec![0.0], vec![1.0]];
        let amplitudes = project_amplitudes(layout, &solution, &spectra);
        assert!((amplitudes[0] - 1.0).abs() < 1.0e-9, "{amplitudes:?}");
    }

    // Wire noise does not leak into the light amplitude.
    let operator = RefitOperator::new(&store, &system, &ReferenceGemm).expect("operator");
    solve_block_bicgstab(&operator, &mut solution, SolverSettings::default(), &ReferenceGemm);
    let amplitudes = project_amplitudes(layout, &solution, &[vec![3.0], vec![1.0]]);
    assert!((amplitudes[0] - 1.0).abs() < 1.0e-9, "{amplitudes:?}");
}

/// Column-major block with a dominant, slowly rising diagonal.
fn banded_block(dim: usize) -> Vec<f64> {
    let mut block = vec![0.0; dim * dim];
    for col in 0..dim {
        for row in 0..dim {
            block[col * dim + row] = if row == col {
                3.0 + 0.25 * row as f64
            } else {
                0.1 / (1.0 + row.abs_diff(col) as f64)
            };
        }
    }
    block
}

fn wire(signal: usize, entries: [(usize, [f64; 3]); 2]) -> ResolvedWireModel {
    ResolvedWireModel {
        signal,
        deposit_index: entries[0].0,
        deposit_gain: 300.0,
        templates: entries
            .into_iter()
            .map(|(channel_index, template)| ChannelTemplate {
                channel_index,
                template: template.to_vec(),
            })
            .collect(),
    }
}

fn two_wire_problem() -> (NoiseBlockStore, RefitSystem) {
    let window = FrequencyWindow { min: 3, max: 4 };
    let store = NoiseBlockStore::from_blocks(
        vec![10, 11, 152, 153],
        window,
        vec![banded_block(8), banded_block(4)],
    )
    .expect("noise store");
    let wires = vec![
        wire(0, [(0, [1.0, 0.4, -0.2]), (1, [0.3, -0.1, 0.05])]),
        wire(1, [(1, [0.8, -0.5, 0.3]), (0, [0.2, 0.1, -0.1])]),
    ];
    let system = RefitSystem::new(
        &store,
        vec![0.9, -0.3, 0.6],
        wires,
        vec![2.0, 1.5],
        vec![0.4, 0.3],
    )
    .expect("system");
    (store, system)
}

#[test]
fn all_columns_meet_their_constraints() {
    let (store, system) = two_wire_problem();
    let layout = system.layout();
    let kernels: [&dyn Gemm; 2] = [&ReferenceGemm, &FaerGemm];

    let mut solutions = Vec::new();
    for gemm in kernels {
        let operator = RefitOperator::new(&store, &system, gemm).expect("operator");
        let mut solution = initial_guess(&system, &store);
        let report =
            solve_block_bicgstab(&operator, &mut solution, SolverSettings::default(), gemm);
        assert!(report.converged, "{}: {report:?}", gemm.name());
        assert!(report.worst_residual_sq < 1.0e-22);

        let product = operator.apply(&solution);
        for column in 0..layout.solution_count() {
            for row in 0..layout.column_len() {
                let expected = if row == layout.constraint_row(column) {
                    1.0
                } else {
                    0.0
                };
                let actual = product[layout.column_start(column) + row];
                assert!(
                    (actual - expected).abs() < 1.0e-9,
                    "{}: column {column} row {row} is {actual}",
                    gemm.name()
                );
            }
        }
        solutions.push(solution);
    }

    for (reference, faer) in solutions[0].iter().zip(&solutions[1]) {
        assert!((reference - faer).abs() < 1.0e-8);
    }
}

#[test]
fn solve_is_deterministic() {
    let (store, system) = two_wire_problem();
    let run = || {
        let operator = RefitOperator::new(&store, &system, &FaerGemm).expect("operator");
        let mut solution = initial_guess(&system, &store);
        let report =
            solve_block_bicgstab(&operator, &mut solution, SolverSettings::default(), &FaerGemm);
        (solution, report)
    };
    let (first, first_report) = run();
    let (second, second_report) = run();
    assert_eq!(first, second);
    assert_eq!(first_report, second_report);
}
