use std::fs;

use ip_circuits::app::build_calculator;
use ip_circuits::data::{NoiseSpec, generate_spectrum, log_space};
use ip_circuits::domain::{ParamKey, Topology};
use ip_circuits::io::{
    FileType, Session, append_result_row, find_result_row, load_spectrum, recover_parameters, results_row,
    write_header, write_spectrum_csv,
};
use ip_circuits::models::CircuitModel;

#[test]
fn evaluation_row_recovers_session_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let spectrum_path = dir.path().join("line1.csv");
    let results_path = dir.path().join("results.csv");

    let mut session = Session::default();
    session.topology = Topology::Series;
    session.negative_rinf = true;
    session.params.set(ParamKey::Pei, 2.5);

    let model = CircuitModel::new(session.topology).with_negative_rinf(true);
    let freqs = log_space(0.01, 1e5, 30).unwrap();
    let noise = NoiseSpec {
        relative_sigma: 0.001,
        seed: 3,
    };
    let spectrum = generate_spectrum(&model, &session.params, &freqs, Some(noise)).unwrap();
    write_spectrum_csv(&spectrum_path, &spectrum).unwrap();

    let ingested = load_spectrum(&spectrum_path, FileType::Csv).unwrap();
    assert_eq!(ingested.source, "line1.csv");
    assert_eq!(ingested.spectrum.len(), 30);

    let mut calc = build_calculator(&session).unwrap();
    calc.set_spectrum(ingested.spectrum).unwrap();
    let result = calc.run_manual(&session.params).unwrap();
    assert_eq!(result.special_freq.len(), 4);
    let mismatch = calc.latest_variables().unwrap().mismatch;
    assert!(mismatch > 0.0);

    write_header(&results_path, &session.variables_to_print).unwrap();
    let row = results_row(
        &session.params,
        session.negative_rinf,
        &ingested.source,
        "2024-05-06 07:08:09",
        &calc.model_report(),
    );
    append_result_row(&results_path, &session.variables_to_print, &row).unwrap();

    let text = fs::read_to_string(&results_path).unwrap();
    assert_eq!(text.lines().count(), 2);
    assert!(text.lines().nth(1).unwrap().starts_with("line1.csv,2024-05-06 07:08:09,Series Circuit,-10,"));

    let saved = find_result_row(&results_path, &session.variables_to_print, "line1.csv")
        .unwrap()
        .unwrap();
    assert_eq!(saved["mismatch"].parse::<f64>().unwrap(), mismatch);

    let recovered = recover_parameters(&saved);
    assert_eq!(recovered.negative_rinf, Some(true));
    assert_eq!(recovered.params, session.params);

    let mut restored = Session::default();
    restored.apply_recovered(&recovered.params, recovered.negative_rinf);
    assert_eq!(restored.params, session.params);
    assert!(restored.negative_rinf);
}

#[test]
fn instrument_file_evaluates_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("station.z");

    let session = Session::default();
    let model = CircuitModel::new(session.topology);
    let freqs = log_space(0.05, 2e4, 25).unwrap();
    let spectrum = generate_spectrum(&model, &session.params, &freqs, None).unwrap();

    let mut text: String = (0..128).map(|i| format!("preamble {i}\n")).collect();
    for i in 0..spectrum.len() {
        text.push_str(&format!(
            "{}\t0\t0\t0\t{}\t{}\n",
            spectrum.freq()[i],
            spectrum.z_real()[i],
            spectrum.z_imag()[i]
        ));
    }
    fs::write(&path, text).unwrap();

    let ingested = load_spectrum(&path, FileType::NewZ).unwrap();
    assert_eq!(ingested.spectrum, spectrum);

    let mut calc = build_calculator(&session).unwrap();
    calc.set_spectrum(ingested.spectrum).unwrap();
    let result = calc.run_manual(&session.params).unwrap();

    assert!(calc.latest_variables().unwrap().mismatch < 1e-12);
    assert_eq!(result.time_domain.time.len(), 8193);
    let charge = calc.latest_chargeability().unwrap();
    assert!(charge.vp.is_finite() && charge.mx.is_finite());
    assert_eq!(calc.latest_metrics().unwrap().len(), 9);
}
