//! Two-LED blinky on the Raspberry Pi Pico: one kernel process per LED, each
//! sleeping on the software timer between toggles while the idle process
//! feeds the watchdog.

#![no_std]
#![no_main]

use core::cell::RefCell;
use core::ptr;

use critical_section::Mutex;
use embedded_hal::digital::OutputPin;
use panic_halt as _;
use rp2040_hal::{self as hal, pac};

use hal::gpio::bank0::{Gpio0, Gpio1};
use hal::gpio::{FunctionSioOutput, Pin, PullDown};
use hal::timer::Alarm;

use picokern as kern;
use picokern::arch::interrupts::{set_tick_alarm, TICK_PERIOD};

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

/// External high-speed crystal on the Pico board.
const XTAL_FREQ_HZ: u32 = 12_000_000;

type Led0 = Pin<Gpio0, FunctionSioOutput, PullDown>;
type Led1 = Pin<Gpio1, FunctionSioOutput, PullDown>;

static LED0: Mutex<RefCell<Option<Led0>>> = Mutex::new(RefCell::new(None));
static LED1: Mutex<RefCell<Option<Led1>>> = Mutex::new(RefCell::new(None));
static WATCHDOG: Mutex<RefCell<Option<hal::Watchdog>>> = Mutex::new(RefCell::new(None));

#[rp2040_hal::entry]
fn main() -> ! {
    let mut pac = pac::Peripherals::take().unwrap();

    let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);
    let clocks = hal::clocks::init_clocks_and_plls(
        XTAL_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .unwrap();

    // The hardware timer doubles as the tick source (alarm 0) and the
    // high-resolution timestamp counter. It lives in this frame forever:
    // the boot stack is never torn down.
    let mut timer = hal::Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
    let mut alarm = timer.alarm_0().unwrap();
    let _ = alarm.schedule(TICK_PERIOD);
    alarm.enable_interrupt();
    set_tick_alarm(alarm);
    unsafe { kern::clock::register_hp_counter(&timer) };

    let sio = hal::Sio::new(pac.SIO);
    let pins = hal::gpio::Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );
    critical_section::with(|cs| {
        LED0.borrow(cs).replace(Some(pins.gpio0.into_push_pull_output()));
        LED1.borrow(cs).replace(Some(pins.gpio1.into_push_pull_output()));
        WATCHDOG.borrow(cs).replace(Some(watchdog));
    });

    kern::kernel_init();
    kern::set_idle_hook(feed_watchdog);
    kern::create_process(blink_fast, ptr::null_mut(), 1024, 0, "fast").unwrap();
    kern::create_process(blink_slow, ptr::null_mut(), 1024, 0, "slow").unwrap();

    unsafe { pac::NVIC::unmask(pac::Interrupt::TIMER_IRQ_0) };

    kern::kernel_start();
}

fn feed_watchdog() {
    critical_section::with(|cs| {
        if let Some(watchdog) = WATCHDOG.borrow(cs).borrow_mut().as_mut() {
            watchdog.feed();
        }
    });
}

fn set_led0(on: bool) {
    critical_section::with(|cs| {
        if let Some(led) = LED0.borrow(cs).borrow_mut().as_mut() {
            let _ = if on { led.set_high() } else { led.set_low() };
        }
    });
}

fn set_led1(on: bool) {
    critical_section::with(|cs| {
        if let Some(led) = LED1.borrow(cs).borrow_mut().as_mut() {
            let _ = if on { led.set_high() } else { led.set_low() };
        }
    });
}

fn blink_fast(_arg: *mut ()) {
    loop {
        set_led0(true);
        kern::sleep_ms(100);
        set_led0(false);
        kern::sleep_ms(100);
    }
}

fn blink_slow(_arg: *mut ()) {
    loop {
        set_led1(true);
        kern::sleep_ms(500);
        set_led1(false);
        kern::sleep_ms(500);
    }
}
