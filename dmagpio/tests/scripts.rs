//! Script registry and interpreter tests through the facade.

use dmagpio::Gpio;
use dmagpio::drivers::simulation::SimulationBackend;
use dmagpio_common::config::GpioConfig;
use dmagpio_common::error::GpioError;
use dmagpio_common::types::ScriptStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn gpio() -> (Arc<SimulationBackend>, Gpio) {
    let sim = Arc::new(SimulationBackend::new());
    let gpio = Gpio::with_backend(GpioConfig::default(), sim.clone()).unwrap();
    (sim, gpio)
}

fn wait_status(gpio: &Gpio, id: u32, want: ScriptStatus) -> [i32; 10] {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let (status, params) = gpio.script_status(id).unwrap();
        if status == want {
            return params;
        }
        assert!(Instant::now() < deadline, "script {id} stuck in {status:?}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

const COUNTDOWN: &str = "
    # blink pin 4 p0 times, counting in p1
    tag 10
    w 4 1
    mils 1
    w 4 0
    inr p1
    dcr p0
    jnz 10
";

#[test]
fn countdown_runs_to_completion() {
    let (sim, gpio) = gpio();
    let id = gpio.store_script(COUNTDOWN).unwrap();
    assert_eq!(gpio.script_status(id).unwrap().0, ScriptStatus::Halted);

    gpio.run_script(id, &[3, 0]).unwrap();
    let params = wait_status(&gpio, id, ScriptStatus::Halted);
    assert_eq!(params[0], 0);
    assert_eq!(params[1], 3);
    assert_eq!(sim.latch() & (1 << 4), 0);

    // A second run starts from fresh parameters.
    gpio.run_script(id, &[1, 10]).unwrap();
    let params = wait_status(&gpio, id, ScriptStatus::Halted);
    assert_eq!(&params[..2], &[0, 11]);
}

#[test]
fn semicolon_separated_loop_halts_at_zero() {
    let (_sim, gpio) = gpio();
    let id = gpio.store_script("LD 0 5; TAG 1; DCR 0; JNZ 1; HALT").unwrap();
    gpio.run_script(id, &[]).unwrap();
    let params = wait_status(&gpio, id, ScriptStatus::Halted);
    assert_eq!(params[0], 0);

    assert_eq!(gpio.store_script("TAG 1; JNZ 2"), Err(GpioError::BadTag(2)));
}

#[test]
fn wait_resumes_on_an_edge() {
    let (sim, gpio) = gpio();
    let id = gpio.store_script("wait 0x40 sta p1").unwrap();
    gpio.run_script(id, &[]).unwrap();
    wait_status(&gpio, id, ScriptStatus::Waiting);

    sim.drive(6, true);
    let params = wait_status(&gpio, id, ScriptStatus::Halted);
    assert_eq!(params[1], 0x40);
}

#[test]
fn runtime_fault_fails_the_script() {
    let (_sim, gpio) = gpio();
    let id = gpio.store_script("lda 5 div p0").unwrap();
    gpio.run_script(id, &[0]).unwrap();
    wait_status(&gpio, id, ScriptStatus::Failed);

    // A failed script can run again.
    gpio.run_script(id, &[5]).unwrap();
    wait_status(&gpio, id, ScriptStatus::Halted);
}

#[test]
fn host_errors_land_in_the_accumulator() {
    let (_sim, gpio) = gpio();
    let id = gpio.store_script("w 60 1 sta p0 mils 70000 sta p1").unwrap();
    gpio.run_script(id, &[]).unwrap();
    let params = wait_status(&gpio, id, ScriptStatus::Halted);
    assert_eq!(params[0], GpioError::BadGpio(60).code());
    assert_eq!(params[1], GpioError::BadMilsDelay(70_000).code());
}

#[test]
fn store_rejects_bad_programs() {
    let (_sim, gpio) = gpio();
    assert_eq!(gpio.store_script("jmp 99"), Err(GpioError::BadTag(99)));
    assert_eq!(
        gpio.store_script("tag 1 nop tag 1"),
        Err(GpioError::DuplicateTag(1))
    );
    assert!(matches!(
        gpio.store_script("frobnicate 1"),
        Err(GpioError::BadScriptCmd(_))
    ));
    assert_eq!(gpio.store_script("ld v150 1"), Err(GpioError::BadVarNum(150)));
    assert_eq!(gpio.store_script("ld p10 1"), Err(GpioError::BadParamNum(10)));
}

#[test]
fn running_script_guards_run_and_delete() {
    let (_sim, gpio) = gpio();
    let id = gpio.store_script("tag 1 mils 5 jmp 1").unwrap();
    gpio.run_script(id, &[]).unwrap();
    assert_eq!(gpio.run_script(id, &[]), Err(GpioError::NotHalted(id)));
    assert_eq!(gpio.delete_script(id), Err(GpioError::NotHalted(id)));
    assert_eq!(
        gpio.run_script(id, &[0; 11]),
        Err(GpioError::TooManyParams(11))
    );

    gpio.stop_script(id).unwrap();
    assert_eq!(gpio.script_status(id).unwrap().0, ScriptStatus::Halted);
    gpio.delete_script(id).unwrap();
    assert_eq!(gpio.script_status(id), Err(GpioError::BadScriptId(id)));
    assert_eq!(gpio.run_script(id, &[]), Err(GpioError::BadScriptId(id)));
}

#[test]
fn script_table_is_bounded() {
    let (_sim, gpio) = gpio();
    let ids: Vec<u32> = (0..32).map(|_| gpio.store_script("nop").unwrap()).collect();
    assert_eq!(gpio.store_script("nop"), Err(GpioError::NoScriptRoom));
    gpio.delete_script(ids[7]).unwrap();
    assert_eq!(gpio.store_script("nop").unwrap(), ids[7]);
}

#[test]
fn terminate_right_after_run_returns() {
    for _ in 0..20 {
        let (_sim, gpio) = gpio();
        let id = gpio.store_script("tag 1 mils 5 jmp 1").unwrap();
        gpio.run_script(id, &[]).unwrap();
        let start = Instant::now();
        gpio.terminate();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(gpio.script_status(id), Err(GpioError::BadScriptId(id)));
    }
}

#[test]
fn terminate_stops_a_waiting_script() {
    let (_sim, gpio) = gpio();
    let id = gpio.store_script("wait 0x40 sta p0").unwrap();
    gpio.run_script(id, &[]).unwrap();
    wait_status(&gpio, id, ScriptStatus::Waiting);
    let start = Instant::now();
    gpio.terminate();
    assert!(start.elapsed() < Duration::from_secs(1));
}
