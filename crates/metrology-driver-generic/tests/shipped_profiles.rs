//! The profiles under `config/devices` load, validate and drive a simulated bus.

use metrology_core::{
    InstrumentCategory, OutputControl, PowerSensor, Readable, SignalSource, SimulatedTransport,
    SpectrumAnalyzer,
};
use metrology_core::{InstrumentError, Reading};
use metrology_driver_generic::{find_profile, load_profiles, ParamMap, ProfiledInstrument};
use std::path::PathBuf;
use std::time::Duration;

fn profile_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/devices")
}

async fn open(name: &str, sim: &SimulatedTransport) -> ProfiledInstrument {
    let profile = find_profile(&profile_dir(), name).unwrap();
    ProfiledInstrument::with_transport(profile, Box::new(sim.clone()))
        .await
        .unwrap()
}

#[test]
fn every_shipped_profile_is_valid() {
    let dir = profile_dir();
    let files = std::fs::read_dir(&dir)
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .map(|e| e.path().extension().is_some_and(|x| x == "toml"))
                .unwrap_or(false)
        })
        .count();
    let profiles = load_profiles(&dir).unwrap();
    assert_eq!(profiles.len(), files, "a shipped profile failed validation");

    for category in [
        InstrumentCategory::SignalGenerator,
        InstrumentCategory::Multimeter,
        InstrumentCategory::PowerMeter,
        InstrumentCategory::SpectrumAnalyzer,
        InstrumentCategory::Calibrator,
        InstrumentCategory::Counter,
        InstrumentCategory::AudioAnalyzer,
    ] {
        assert!(
            profiles.iter().any(|p| p.device.category == category),
            "no profile for {:?}",
            category
        );
    }

    let expected: &[(&str, &[&str])] = &[
        ("Agilent N5181A", &["rf_output", "silence"]),
        ("Fluke 55XXA", &["voltage_ac", "thermocouple"]),
        ("Fluke 96270A", &["sine", "am", "fm", "pm", "output_route"]),
        ("Fluke 9640A", &["sine", "am", "fm", "pm", "silence"]),
        ("HP 33120A", &["sine", "ramp", "square", "dc", "dc_offset", "output_unit"]),
        ("HP 3314A", &["sine", "square", "triangle"]),
        (
            "HP 3325A",
            &["sine", "positive_ramp", "negative_ramp", "dc_offset_only", "silence"],
        ),
        (
            "HP 3325B",
            &[
                "sine",
                "positive_ramp",
                "negative_ramp",
                "dc_offset_only",
                "phase",
                "continuous_sweep",
                "sweep_start",
                "sweep_stop",
                "sweep_marker",
                "sweep_time",
            ],
        ),
        ("HP 3458A", &["auto_cal", "dcv", "acv", "four_wire_resistance", "display", "read"]),
        ("HP 4418B", &["measure_power", "measure_power_with_correction", "zero"]),
        ("HP 53132A", &["frequency", "period", "averaging", "std_deviation", "read"]),
        ("HP 8901B", &["am", "fm", "pm", "rf_power", "peak_half", "lowpass_20khz", "read"]),
        ("HP 8903B", &["sinad", "distortion", "snr", "output", "read_right", "read_left"]),
        (
            "Keithley 2001",
            &[
                "dcv",
                "acv",
                "two_wire_resistance",
                "aci",
                "dci",
                "frequency",
                "thermocouple",
                "two_wire_rtd",
                "four_wire_rtd",
            ],
        ),
        (
            "Keithley 2015",
            &[
                "aci",
                "dci",
                "two_wire_resistance",
                "thermocouple",
                "ac_averaging",
                "delay",
                "thd",
            ],
        ),
        (
            "R&S FSP",
            &["start", "stop", "span", "rbw", "vbw", "ref_to_marker", "thd", "window"],
        ),
        ("Tektronix TSG4104A", &["rf", "lf", "silence"]),
    ];
    for (device, commands) in expected {
        let profile = profiles
            .iter()
            .find(|p| p.device.name == *device)
            .unwrap_or_else(|| panic!("no profile named '{}'", device));
        for command in *commands {
            assert!(
                profile.commands.contains_key(*command),
                "{} has no '{}' command",
                device,
                command
            );
        }
    }
}

#[tokio::test]
async fn keithley_2001_reads_scientific_reply() {
    let sim = SimulatedTransport::new("k2001");
    sim.respond_to("FETC?", "+1.234567E-03VDC,+0.000SECS");
    let dmm = open("keithley_2001", &sim).await;

    let value = dmm.read().await.unwrap();
    assert!((value - 1.234567e-3).abs() < 1e-12);
    assert_eq!(sim.written(), vec!["*RST", "INIT:CONT ON", "FETC?"]);
}

#[tokio::test]
async fn keithley_2015_range_selection() {
    let sim = SimulatedTransport::new("k2015");
    let dmm = open("keithley_2015", &sim).await;
    sim.clear_written();

    dmm.run("dcv", &ParamMap::new()).await.unwrap();
    let mut fixed = ParamMap::new();
    fixed.insert("range".into(), 10.0.into());
    dmm.run("dcv", &fixed).await.unwrap();

    assert_eq!(
        sim.written(),
        vec![
            "SENS:FUNC \"VOLT:DC\"",
            "SENS:VOLT:DC:RANG:AUTO 1",
            "SENS:VOLT:DC:NPLC 1",
            "SENS:FUNC \"VOLT:DC\"",
            "SENS:VOLT:DC:RANG 10",
            "SENS:VOLT:DC:NPLC 1",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn power_meter_correction_factor_command() {
    let sim = SimulatedTransport::new("4418b");
    sim.respond_to("FETC?", "-10.02");
    let meter = open("HP 4418B", &sim).await;

    let format = meter
        .format_command("measure_power_with_correction", &{
            let mut p = ParamMap::new();
            p.insert("factor".into(), 97.126.into());
            p
        })
        .unwrap();
    assert!(format.contains(&"CAL1:RCF 97.13PCT".to_string()));

    let power = meter.measure_power_with_correction(97.126).await.unwrap();
    assert_eq!(power, -10.02);
}

#[tokio::test]
async fn generator_set_output_and_silence() {
    let sim = SimulatedTransport::new("n5181a");
    let gen = open("agilent_n5181a", &sim).await;

    gen.set_output(-20.0, 1.5e9).await.unwrap();
    gen.silence().await.unwrap();
    assert_eq!(
        sim.written(),
        vec![
            "OUTP:STAT 0",
            "FREQ 1500000000",
            "POW:AMPL -20 dBm",
            "OUTP:STAT 1",
            "OUTP:STAT 0",
        ]
    );
}

#[tokio::test]
async fn hp_3325b_function_guard() {
    let sim = SimulatedTransport::new("3325b");
    sim.respond_to("FU?", "FU2");
    let gen = open("hp_3325b", &sim).await;

    gen.set_output(1.0, 1000.0).await.unwrap();
    assert_eq!(
        sim.written(),
        vec!["FU?", "FU 1", "OF0.0VO", "FR1000.0HZ AM1VO OF0VO"]
    );
}

#[tokio::test]
async fn hp_3325b_silence_is_minimum_sine() {
    let sim = SimulatedTransport::new("3325b");
    sim.respond_to("FU?", "FU1");
    let gen = open("hp_3325b", &sim).await;

    gen.silence().await.unwrap();
    assert_eq!(
        sim.written(),
        vec!["FU?", "OF0.0VO", "FR10000.0HZ AM0.001VO OF0VO"]
    );
}

#[tokio::test(start_paused = true)]
async fn keithley_slow_read_waits_for_the_filter() {
    for name in ["keithley_2001", "keithley_2015"] {
        let sim = SimulatedTransport::new(name);
        sim.respond_to("FETC?", "+1.000000E+00");
        let dmm = open(name, &sim).await;

        let start = tokio::time::Instant::now();
        let reading = dmm.run("slow_read", &ParamMap::new()).await.unwrap();
        assert_eq!(reading, Some(Reading::Float(1.0)));
        assert!(start.elapsed() >= Duration::from_secs(20), "{}", name);
    }
}

#[tokio::test(start_paused = true)]
async fn spectrum_analyzer_window_and_peak() {
    let sim = SimulatedTransport::new("fsp");
    sim.respond_to("SWE:TIME?", "0.05")
        .respond_to("CALC:MARK:Y?", "-3.5");
    let sa = open("rs_fsp", &sim).await;
    sim.clear_written();

    sa.set_window(10e3, 1e3, 100.0, 1.0).await.unwrap();
    assert_eq!(sa.sweep_time().await.unwrap(), 0.05);
    assert_eq!(sa.peak_power().await.unwrap(), -3.5);
    assert_eq!(
        sim.written(),
        vec![
            "FREQ:SPAN 10000",
            "FREQ:CENT 1000; *WAI",
            "BAND 100; *WAI",
            "DISP:WIND:TRAC:Y:RLEV 1dBm; *WAI",
            "SWE:TIME?",
            "CALC:MARK:MAX",
            "CALC:MARK:Y?",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn spectrum_analyzer_window_missing_rbw_sends_nothing() {
    let sim = SimulatedTransport::new("fsp");
    let sa = open("rs_fsp", &sim).await;
    sim.clear_written();

    let mut params = ParamMap::new();
    params.insert("span".into(), 10e3.into());
    params.insert("center".into(), 1e3.into());
    let err = sa.run("window", &params).await.unwrap_err();

    assert!(format!("{:#}", err).contains("needs parameter 'rbw'"));
    assert!(matches!(
        err.downcast_ref::<InstrumentError>(),
        Some(InstrumentError::MissingParameter { .. })
    ));
    assert!(sim.written().is_empty());
}

#[tokio::test(start_paused = true)]
async fn spectrum_analyzer_span_keywords_and_thd() {
    let sim = SimulatedTransport::new("fsp");
    sim.respond_to("CALC:MARK:FUNC:HARM:DIST?", "-62.5");
    let sa = open("rs_fsp", &sim).await;
    sim.clear_written();

    for span in ["FULL", "ZERO"] {
        let mut params = ParamMap::new();
        params.insert("span".into(), span.into());
        sa.run("span", &params).await.unwrap();
    }
    let mut params = ParamMap::new();
    params.insert("span".into(), 2e6.into());
    sa.run("span", &params).await.unwrap();
    let thd = sa.run("thd", &ParamMap::new()).await.unwrap();

    assert_eq!(thd, Some(Reading::Float(-62.5)));
    assert_eq!(
        sim.written(),
        vec![
            "FREQ:SPAN:FULL",
            "FREQ:SPAN 0Hz",
            "FREQ:SPAN 2000000",
            "CALC:MARK:FUNC:HARM:STAT ON",
            "INIT:CONT ON; *WAI",
            "CALC:MARK:FUNC:HARM:DIST?",
        ]
    );
}

#[tokio::test]
async fn tsg4104a_routes_by_frequency() {
    let sim = SimulatedTransport::new("tsg");
    let gen = open("tsg4104a", &sim).await;

    gen.set_output(-10.0, 1e9).await.unwrap();
    gen.set_output(-10.0, 1e6).await.unwrap();
    gen.silence().await.unwrap();
    assert_eq!(
        sim.written(),
        vec![
            "ENBL 0",
            "AMPR -10 dBm",
            "FREQ 1000000000",
            "ENBR 1",
            "ENBL 0",
            "FREQ 1000000",
            "AMPL -10 dBm",
            "ENBL 1",
            "ENBL 0",
            "ENBR 0",
        ]
    );
}

#[tokio::test]
async fn counter_frequency_reading() {
    let sim = SimulatedTransport::new("53132a");
    sim.respond_to("FETC?", "+1.00000012E+007");
    let counter = open("hp_53132a", &sim).await;

    counter.run("frequency", &ParamMap::new()).await.unwrap();
    let value = counter.read().await.unwrap();
    assert!((value - 10_000_001.2).abs() < 1e-3);
    assert_eq!(
        sim.written(),
        vec![
            "SENS:FUNC:ON \"FREQ 1\"",
            "SENS:FREQ:ARM:SOUR IMM",
            "SENS:FREQ:ARM:STOP:TIM 1",
            "INIT:CONT ON",
            "FETC?",
        ]
    );
}

#[tokio::test]
async fn counter_averaging_on_and_off() {
    let sim = SimulatedTransport::new("53132a");
    let counter = open("hp_53132a", &sim).await;

    let mut params = ParamMap::new();
    params.insert("count".into(), 50.0.into());
    assert_eq!(
        counter.format_command("averaging", &params).unwrap(),
        vec![
            "INIT:CONT OFF",
            "CALC3:AVER:COUN 50",
            "CALC3:AVER:TYPE MEAN",
            "DISP:TEXT:FEED \"CALC3\"",
            "CALC3:AVER:STAT ON",
            "INIT:CONT ON",
        ]
    );
    params.insert("enabled".into(), false.into());
    assert_eq!(
        counter.format_command("averaging", &params).unwrap(),
        vec!["CALC3:AVER:STAT OFF"]
    );
}

#[tokio::test]
async fn modulation_analyzer_reads_without_a_query() {
    let sim = SimulatedTransport::new("8901b");
    sim.push_reply("+12.5E+00");
    let analyzer = open("hp_8901b", &sim).await;

    analyzer.run("am", &ParamMap::new()).await.unwrap();
    assert_eq!(analyzer.read().await.unwrap(), 12.5);
    assert_eq!(sim.written(), vec!["M1"]);
}

#[tokio::test]
async fn audio_analyzer_talks_displays() {
    let sim = SimulatedTransport::new("8903b");
    sim.respond_to("RR", "+0.0123").respond_to("RL", "+1.0E+03");
    let analyzer = open("hp_8903b", &sim).await;

    analyzer.set_output(1.5, 1000.0).await.unwrap();
    assert_eq!(analyzer.read().await.unwrap(), 0.0123);
    assert_eq!(
        analyzer.run("read_left", &ParamMap::new()).await.unwrap(),
        Some(Reading::Float(1000.0))
    );
    assert_eq!(sim.written(), vec!["AP1.5VLFR1000HZ", "RR", "RL"]);
}

#[tokio::test]
async fn reference_multimeter_init_and_function() {
    let sim = SimulatedTransport::new("3458a");
    sim.respond_to("SPOLL?", "1.00000123E+1");
    let dmm = open("hp_3458a", &sim).await;

    let mut params = ParamMap::new();
    params.insert("range".into(), 10.0.into());
    dmm.run("dcv", &params).await.unwrap();
    let value = dmm.read().await.unwrap();
    assert!((value - 10.0000123).abs() < 1e-9);
    assert_eq!(
        sim.written(),
        vec!["END ALWAYS", "OFORMAT ASCII", "DCV,10 ; NPLC 100; TRIG AUTO", "SPOLL?"]
    );
}
