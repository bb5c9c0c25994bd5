#![no_std]
#![no_main]

use esp_hal::clock::CpuClock;
use esp_hal::gpio::Level;
use esp_hal::rmt::{Rmt, TxChannelConfig, TxChannelCreator};
use esp_hal::rng::Rng;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{self, Uart};
use esp_hal::usb_serial_jtag::UsbSerialJtag;
use esp_println::println;

extern crate alloc;

// WiFi imports
use esp_wifi::wifi;

// Embassy-net imports
use embassy_net::{Config, Stack, StackResources};
use embassy_time::{Instant, Timer};
use esp_hal_embassy::Executor;
use static_cell::StaticCell;

// Import our library modules
use ambilight_board::config;
use ambilight_board::rmt_strip::RmtStrip;
use ambilight_board::serial::{UartLink, UsbSerialLink};
use ambilight_board::transport::{DatagramQueue, TransportLink};
use ambilight_board::udp_server::UdpServer;
use ambilight_board::wifi::WiFiManager;
use ambilight_board::{DeviceController, MemoryConfigStore};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

type LedSink = RmtStrip<esp_hal::rmt::Channel<esp_hal::Blocking, 0>>;
type Controller = DeviceController<LedSink, MemoryConfigStore>;

// Static cells for embassy components
static WIFI_INIT_CELL: StaticCell<esp_wifi::EspWifiController<'static>> = StaticCell::new();
static WIFI_MANAGER_CELL: StaticCell<WiFiManager<'static>> = StaticCell::new();
static CONTROLLER_CELL: StaticCell<Controller> = StaticCell::new();
static DATAGRAMS: DatagramQueue = DatagramQueue::new();

// Static executor for embassy tasks
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("[MAIN] Panic: {}", info);
    loop {}
}

// Embassy task to run the network stack
#[embassy_executor::task]
async fn net_task(
    mut runner: embassy_net::Runner<'static, esp_wifi::wifi::WifiDevice<'static>>,
) -> ! {
    runner.run().await
}

/// Keeps the station associated and the DHCP lease alive
#[embassy_executor::task]
async fn wifi_task(wifi_manager: &'static mut WiFiManager<'static>) -> ! {
    wifi_manager.maintain().await
}

/// Bridges the UDP socket and the controller's datagram mailbox
#[embassy_executor::task]
async fn udp_server_task(stack: Stack<'static>) {
    println!("[UDP] Starting UDP server task...");

    let mut udp_server = UdpServer::new(stack, config::UDP_PORT, &DATAGRAMS);
    println!("[UDP] Waiting for network on port {}", udp_server.get_port());
    if let Err(e) = udp_server.run().await {
        println!("[UDP] UDP server error: {:?}", e);
    }
}

/// Sole owner of the strip and the protocol state
#[embassy_executor::task]
async fn controller_task(
    controller: &'static mut Controller,
    mut serial: UsbSerialLink<'static>,
    mut bluetooth: UartLink<'static>,
) -> ! {
    let mut network = DATAGRAMS.link();
    let mut links: [&mut dyn TransportLink; 3] = [&mut serial, &mut network, &mut bluetooth];

    controller.begin(Instant::now(), &mut links);
    println!("[MAIN] Controller running, {} LEDs", controller.state().led_count);

    loop {
        let report = controller.tick(Instant::now(), &mut links);
        if report.signal_lost {
            println!("[MAIN] Signal lost, strip blanked");
        }
        Timer::after(config::TICK_INTERVAL).await;
    }
}

#[esp_hal::main]
fn main() -> ! {
    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    // WiFi driver plus frame buffers
    esp_alloc::heap_allocator!(size: 96 * 1024);

    // Initialize embassy time system
    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    // Initialize WiFi driver
    let timer_group1 = TimerGroup::new(peripherals.TIMG1);
    let rng = Rng::new(peripherals.RNG);
    let wifi_init = match esp_wifi::init(timer_group1.timer0, rng, peripherals.RADIO_CLK) {
        Ok(init) => init,
        Err(e) => panic!("WiFi driver init failed: {:?}", e),
    };
    let wifi_init_ref = WIFI_INIT_CELL.init(wifi_init);

    let (wifi_controller, wifi_interfaces) = match wifi::new(wifi_init_ref, peripherals.WIFI) {
        Ok(parts) => parts,
        Err(e) => panic!("WiFi controller init failed: {:?}", e),
    };
    println!("[WIFI] WiFi driver initialized successfully");

    // Create embassy-net stack with DHCP configuration
    static STACK_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
    let stack_resources = STACK_RESOURCES.init(StackResources::new());
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let (stack, runner) = embassy_net::new(
        wifi_interfaces.sta,
        Config::dhcpv4(Default::default()),
        stack_resources,
        seed,
    );
    let wifi_manager = WIFI_MANAGER_CELL.init(WiFiManager::new(wifi_controller, stack));

    // LED strip on the RMT peripheral
    println!(
        "[LED] Setting up GPIO pin {} for LED data...",
        config::LED_DATA_PIN
    );
    let rmt = match Rmt::new(peripherals.RMT, Rate::from_mhz(10)) {
        Ok(rmt) => rmt,
        Err(e) => panic!("RMT initialization failed: {:?}", e),
    };
    let tx_config = TxChannelConfig::default()
        .with_clk_divider(1)
        .with_idle_output_level(Level::Low)
        .with_idle_output(false)
        .with_carrier_modulation(false);
    let sink: LedSink = match rmt.channel0.configure(peripherals.GPIO4, tx_config) {
        Ok(channel) => RmtStrip::new(channel),
        Err(e) => panic!("RMT channel configuration failed: {:?}", e),
    };

    // Wired transports
    println!(
        "[BT] Bluetooth module on UART1, RX GPIO{} TX GPIO{}",
        config::BLUETOOTH_RX_PIN,
        config::BLUETOOTH_TX_PIN
    );
    let serial = UsbSerialLink::new(UsbSerialJtag::new(peripherals.USB_DEVICE));
    let uart_config = uart::Config::default().with_baudrate(config::BLUETOOTH_BAUD);
    let bluetooth = match Uart::new(peripherals.UART1, uart_config) {
        Ok(uart) => UartLink::new(uart.with_rx(peripherals.GPIO6).with_tx(peripherals.GPIO7)),
        Err(e) => panic!("Bluetooth UART init failed: {:?}", e),
    };

    let controller = CONTROLLER_CELL.init(DeviceController::new(sink, MemoryConfigStore::default()));

    // Initialize embassy executor and run tasks
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        println!("[MAIN] Spawning network task...");
        spawner.spawn(net_task(runner)).ok();

        println!("[MAIN] Spawning WiFi task...");
        spawner.spawn(wifi_task(wifi_manager)).ok();

        println!("[MAIN] Spawning UDP server task...");
        spawner.spawn(udp_server_task(stack)).ok();

        println!("[MAIN] Spawning controller task...");
        match spawner.spawn(controller_task(controller, serial, bluetooth)) {
            Ok(_) => println!("[MAIN] ✅ Controller task spawned successfully"),
            Err(e) => println!("[MAIN] ❌ Failed to spawn controller task: {:?}", e),
        }
    });
}
