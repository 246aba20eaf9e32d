//! Processor tasks - request dispatch, collaborator events, and grace timers
//!
//! Two tasks run side by side and share the `DeviceHost` state via a mutex:
//!
//! * **Service loop**: dispatches API requests and collaborator events into
//!   the host, then forwards whatever the host queued up
//! * **Disconnect timer task**: keeps one slot per address pair and turns
//!   elapsed grace periods into [`Event::DisconnectExpired`] events
//!
//! The service loop holds the host lock only while dispatching. Responses,
//! timer commands, and notifications are sent after the guard is dropped so
//! channel backpressure never blocks the shared state.
//!
//! # Usage
//!
//! [`run`] owns the five collaborators and never returns; spawn it as an
//! Embassy task or drive it from the executor directly:
//!
//! ```rust,ignore
//! use wagtail::{HostOptions, processor};
//!
//! // sdp, store, transport, access and link are the embedder's
//! // implementations of the collaborator traits
//! processor::run(HostOptions::default(), sdp, store, transport, access, link).await;
//! ```

use crate::{
    DeviceHost, EVENT_CHANNEL, Event, HostError, HostOptions, NOTIFICATION_CHANNEL, Notification,
    REQUEST_CHANNEL, RESPONSE_CHANNEL, Request, Response, TIMER_CHANNEL, TimerCommand,
    access::AccessControl,
    address::AddressPair,
    constants::{MAX_DISCONNECT_TIMERS, MAX_PENDING_NOTIFICATIONS},
    device_host,
    discovery::BrowseOrigin,
    sdp::SdpClient,
    storage::ServiceStore,
    transport::{ChannelTransport, LinkControl},
};
use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer};
use heapless::Vec;

/// One armed grace timer
struct TimerSlot {
    pair: AddressPair,
    generation: u32,
    deadline: Instant,
}

async fn process_request<S, St, T, A>(
    host: &mut DeviceHost,
    request: Request,
    sdp: &mut S,
    store: &mut St,
    transport: &mut T,
    access: &mut A,
    timer: &mut Option<TimerCommand>,
) -> Response
where
    S: SdpClient,
    St: ServiceStore,
    T: ChannelTransport,
    A: AccessControl,
{
    match request {
        Request::AddAdapter { id, address } => match host.add_adapter(id, address) {
            Ok(()) => Response::AdapterAdded,
            Err(e) => Response::Error(e),
        },
        Request::RemoveAdapter { id } => {
            match host.remove_adapter(sdp, transport, access, id).await {
                Ok(()) => Response::AdapterRemoved,
                Err(e) => Response::Error(e),
            }
        }
        Request::CreateDevice {
            requestor,
            adapter,
            address,
        } => match host.create_device(sdp, &requestor, adapter, address).await {
            Ok(()) => Response::DeviceCreated,
            Err(e) => Response::Error(e),
        },
        Request::RemoveDevice { adapter, address } => {
            match host
                .remove_device(sdp, transport, access, adapter, address)
                .await
            {
                Ok(()) => Response::DeviceRemoved,
                Err(e) => Response::Error(e),
            }
        }
        Request::DiscoverServices {
            requestor,
            adapter,
            address,
            target,
        } => {
            match host
                .start_browse(
                    sdp,
                    &requestor,
                    adapter,
                    address,
                    target,
                    BrowseOrigin::Discovery,
                )
                .await
            {
                Ok(()) => Response::DiscoveryStarted,
                Err(e) => Response::Error(e),
            }
        }
        Request::CancelDiscovery {
            requestor,
            adapter,
            address,
        } => {
            match host
                .cancel_browse(sdp, store, &requestor, adapter, address)
                .await
            {
                Ok(()) => Response::DiscoveryCancelled,
                Err(e) => Response::Error(e),
            }
        }
        Request::Disconnect { adapter, address } => {
            match host.request_disconnect(adapter, address) {
                Ok(command) => {
                    *timer = Some(command);
                    Response::Disconnecting
                }
                Err(e) => Response::Error(e),
            }
        }
        Request::RegisterDriver(driver) => match host.register_driver(driver.0) {
            Ok(()) => Response::DriverRegistered,
            Err(e) => Response::Error(e),
        },
        Request::UnregisterDriver(driver) => match host.unregister_driver(driver.0) {
            Ok(()) => Response::DriverUnregistered,
            Err(e) => Response::Error(e),
        },
        Request::StartServer { local } => match host.start_hid_server(transport, local).await {
            Ok(()) => Response::ServerStarted,
            Err(e) => Response::Error(e),
        },
        Request::StopServer { local } => {
            match host.stop_hid_server(transport, access, local).await {
                Ok(()) => Response::ServerStopped,
                Err(e) => Response::Error(e),
            }
        }
        Request::GetDevice { adapter, address } => match host.device_info(adapter, address) {
            Ok(info) => Response::Device(info),
            Err(e) => Response::Error(e),
        },
        Request::SetTemporary {
            adapter,
            address,
            temporary,
        } => match host.set_temporary(adapter, address, temporary) {
            Ok(()) => Response::PropertySet,
            Err(e) => Response::Error(e),
        },
        Request::SetCapability {
            adapter,
            address,
            cap,
        } => match host.set_capability(adapter, address, cap) {
            Ok(()) => Response::PropertySet,
            Err(e) => Response::Error(e),
        },
        Request::SetAuthorization {
            adapter,
            address,
            auth,
        } => match host.set_authorization(adapter, address, auth) {
            Ok(()) => Response::PropertySet,
            Err(e) => Response::Error(e),
        },
        Request::SetAgent {
            adapter,
            address,
            agent,
        } => match host.set_agent(adapter, address, agent) {
            Ok(()) => Response::PropertySet,
            Err(e) => Response::Error(e),
        },
    }
}

async fn process_event<S, St, T, A, L>(
    host: &mut DeviceHost,
    event: Event,
    sdp: &mut S,
    store: &mut St,
    transport: &mut T,
    access: &mut A,
    link: &mut L,
) where
    S: SdpClient,
    St: ServiceStore,
    T: ChannelTransport,
    A: AccessControl,
    L: LinkControl,
{
    match event {
        Event::SearchResult {
            pair,
            records,
            error,
        } => {
            host.handle_search_result(sdp, store, pair, &records, error)
                .await;
        }
        Event::ChannelAccepted {
            local,
            remote,
            psm,
            socket,
        } => {
            host.handle_channel_accepted(transport, access, local, remote, psm, socket)
                .await;
        }
        Event::Authorization { pair, verdict } => {
            host.handle_authorization(transport, access, pair, verdict).await;
        }
        Event::LinkEstablished {
            adapter,
            remote,
            handle,
        } => host.handle_link_established(adapter, remote, handle),
        Event::LinkTerminated { adapter, handle } => {
            host.handle_link_terminated(access, adapter, handle).await;
        }
        Event::RequestorLost { requestor } => {
            host.handle_requestor_lost(sdp, store, &requestor).await;
        }
        Event::DisconnectExpired { pair, generation } => {
            host.handle_disconnect_expiry(link, pair, generation).await;
        }
    }
}

async fn forward_notifications(outgoing: Vec<Notification, MAX_PENDING_NOTIFICATIONS>) {
    let sender = NOTIFICATION_CHANNEL.sender();
    for notification in outgoing {
        sender.send(notification).await;
    }
}

async fn service_loop<S, St, T, A, L>(
    sdp: &mut S,
    store: &mut St,
    transport: &mut T,
    access: &mut A,
    link: &mut L,
) -> !
where
    S: SdpClient,
    St: ServiceStore,
    T: ChannelTransport,
    A: AccessControl,
    L: LinkControl,
{
    let request_receiver = REQUEST_CHANNEL.receiver();
    let response_sender = RESPONSE_CHANNEL.sender();
    let event_receiver = EVENT_CHANNEL.receiver();

    loop {
        match select(request_receiver.receive(), event_receiver.receive()).await {
            Either::First(request) => {
                debug!("[PROCESSOR] request: {:?}", request);
                let mut timer = None;
                let (response, outgoing) = match device_host().await {
                    Ok(mut host) => {
                        let response = process_request(
                            &mut host, request, sdp, store, transport, access, &mut timer,
                        )
                        .await;
                        (response, host.take_notifications())
                    }
                    Err(e) => {
                        error!("[PROCESSOR] device host not initialized: {}", e);
                        (Response::Error(HostError::Failed), Vec::new())
                    }
                };
                debug!("[PROCESSOR] response: {:?}", response);
                response_sender.send(response).await;
                if let Some(command) = timer {
                    TIMER_CHANNEL.sender().send(command).await;
                }
                forward_notifications(outgoing).await;
            }
            Either::Second(event) => {
                debug!("[PROCESSOR] event: {:?}", event);
                let outgoing = match device_host().await {
                    Ok(mut host) => {
                        process_event(&mut host, event, sdp, store, transport, access, link)
                            .await;
                        host.take_notifications()
                    }
                    Err(e) => {
                        error!("[PROCESSOR] device host not initialized: {}", e);
                        Vec::new()
                    }
                };
                forward_notifications(outgoing).await;
            }
        }
    }
}

fn arm_timer(slots: &mut Vec<TimerSlot, MAX_DISCONNECT_TIMERS>, command: TimerCommand) {
    let deadline = Instant::now() + Duration::from_secs(command.grace_secs);
    if let Some(slot) = slots.iter_mut().find(|s| s.pair == command.pair) {
        // re-arming supersedes the previous timer for this pair
        slot.generation = command.generation;
        slot.deadline = deadline;
    } else if slots
        .push(TimerSlot {
            pair: command.pair,
            generation: command.generation,
            deadline,
        })
        .is_err()
    {
        warn!("[PROCESSOR] disconnect timer table full, dropping");
    }
}

async fn disconnect_timer_task() -> ! {
    let timer_receiver = TIMER_CHANNEL.receiver();
    let event_sender = EVENT_CHANNEL.sender();
    let mut slots: Vec<TimerSlot, MAX_DISCONNECT_TIMERS> = Vec::new();

    loop {
        let earliest = slots.iter().map(|s| s.deadline).min();
        let Some(deadline) = earliest else {
            let command = timer_receiver.receive().await;
            arm_timer(&mut slots, command);
            continue;
        };
        match select(timer_receiver.receive(), Timer::at(deadline)).await {
            Either::First(command) => arm_timer(&mut slots, command),
            Either::Second(()) => {
                let now = Instant::now();
                let mut i = 0;
                while i < slots.len() {
                    if slots[i].deadline <= now {
                        let slot = slots.remove(i);
                        event_sender
                            .send(Event::DisconnectExpired {
                                pair: slot.pair,
                                generation: slot.generation,
                            })
                            .await;
                    } else {
                        i += 1;
                    }
                }
            }
        }
    }
}

/// Run the device-host processor tasks
///
/// Initializes the global `DeviceHost` and drives the service loop and the
/// disconnect timer task until the executor is torn down.
///
/// # Panics
///
/// Panics if the `DeviceHost` was already initialized.
pub async fn run<S, St, T, A, L>(
    options: HostOptions,
    mut sdp: S,
    mut store: St,
    mut transport: T,
    mut access: A,
    mut link: L,
) where
    S: SdpClient,
    St: ServiceStore,
    T: ChannelTransport,
    A: AccessControl,
    L: LinkControl,
{
    crate::init_device_host(options)
        .await
        .expect("Failed to initialize device host");

    select(
        service_loop(&mut sdp, &mut store, &mut transport, &mut access, &mut link),
        disconnect_timer_task(),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{local_addr, remote_addr, test_pair};

    #[test]
    fn test_arm_timer_replaces_the_slot_for_the_same_pair() {
        let mut slots: Vec<TimerSlot, MAX_DISCONNECT_TIMERS> = Vec::new();

        arm_timer(
            &mut slots,
            TimerCommand {
                pair: test_pair(),
                generation: 1,
                grace_secs: 2,
            },
        );
        arm_timer(
            &mut slots,
            TimerCommand {
                pair: test_pair(),
                generation: 2,
                grace_secs: 2,
            },
        );

        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].generation, 2);
    }

    #[test]
    fn test_arm_timer_keeps_one_slot_per_pair() {
        let mut slots: Vec<TimerSlot, MAX_DISCONNECT_TIMERS> = Vec::new();
        let other = AddressPair::new(remote_addr(), local_addr());

        arm_timer(
            &mut slots,
            TimerCommand {
                pair: test_pair(),
                generation: 1,
                grace_secs: 2,
            },
        );
        arm_timer(
            &mut slots,
            TimerCommand {
                pair: other,
                generation: 1,
                grace_secs: 2,
            },
        );

        assert_eq!(slots.len(), 2);
    }
}
