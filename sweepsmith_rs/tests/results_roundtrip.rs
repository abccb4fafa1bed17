use anyhow::Result;
use sweepsmith_rs::results::ELAPSED_TIME_RESULT;
use sweepsmith_rs::{Accumulator, ParameterSpace, ResultsCollection, Value};

fn mixed_collection() -> Result<ResultsCollection> {
    let mut params = ParameterSpace::new();
    params
        .add("bias", 1.3)
        .add("SNR", vec![0, 5, 10])
        .add("label", "run")
        .add("flag", true);
    params.set_unpack("SNR", true)?;

    let mut collection = ResultsCollection::with_params(params);
    for snr in [0.0, 5.0, 10.0] {
        let mut ratio = Accumulator::ratio("ber").with_history();
        ratio.update(snr + 1.0, Some(40.0))?;
        ratio.update(snr + 2.0, Some(40.0))?;
        collection.append(ratio)?;
        collection.append(Accumulator::sum_of("symbols", 80.0))?;
        collection.append(Accumulator::misc_of("note", format!("snr {snr}")))?;
    }
    collection.add(Accumulator::misc_of(ELAPSED_TIME_RESULT, 3.5));
    Ok(collection)
}

#[test]
fn results_roundtrip_through_a_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("results.json");
    let original = mixed_collection()?;

    original.save_to_file(&path)?;
    let reloaded = ResultsCollection::load_from_file(&path)?;

    assert_eq!(reloaded, original);
    assert_eq!(reloaded.params(), original.params());
    assert_eq!(
        reloaded.names().collect::<Vec<_>>(),
        original.names().collect::<Vec<_>>()
    );
    for name in ["ber", "symbols", "note"] {
        let before = original.get(name).unwrap();
        let after = reloaded.get(name).unwrap();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after) {
            assert_eq!(a.kind_code(), b.kind_code());
            assert_eq!(a.result(), b.result());
            assert_eq!(a.num_updates(), b.num_updates());
        }
    }

    // History survives, so derived statistics are unchanged.
    let intervals_before = original.confidence_intervals_for("ber", 95.0, None)?;
    let intervals_after = reloaded.confidence_intervals_for("ber", 95.0, None)?;
    assert_eq!(intervals_before, intervals_after);
    Ok(())
}

#[test]
fn filtered_values_after_reload() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("results.json");
    mixed_collection()?.save_to_file(&path)?;
    let reloaded = ResultsCollection::load_from_file(&path)?;

    let fixed = [("SNR", Value::from(5))];
    let ber = reloaded.values_f64_for("ber", Some(&fixed))?;
    assert_eq!(ber, vec![13.0 / 80.0]);
    let notes = reloaded.values_for("note", Some(&fixed))?;
    assert_eq!(notes[0].to_string(), "snr 5");
    Ok(())
}

#[test]
fn loading_garbage_reports_the_path() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("broken.json");
    std::fs::write(&path, b"not json")?;
    let err = ResultsCollection::load_from_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("broken.json"));
    Ok(())
}
